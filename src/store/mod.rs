//! Durable Store — typed CRUD over five tables with debounced flush and
//! schema migration on boot
//!
//! Backed by an embedded `sled` database: one tree per table, plus small
//! hand-maintained secondary-index trees for the lookups the rest of the
//! engine needs in O(1)/O(log n) instead of a full scan (entity label,
//! active `(subject, predicate)` relation). Everything else — scans by
//! subject, object, predicate, tier, session — iterates the owning tree,
//! the same brute-force tradeoff the vector store makes deliberately:
//! simpler and fast enough at personal-store scale, with no
//! index-staleness class of bug.
//!
//! Every mutating call schedules a flush ~500ms in the future; further
//! writes inside that window extend it (trailing-edge debounce). Data is
//! durable only up to the last completed flush unless a caller asks for
//! the synchronous [`DurableStore::close`].

mod schema;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{MemoryError, Result};
use crate::types::{AccessLogRow, Entity, Relation, Session, Summary, Tier, VectorRecord};

const DEBOUNCE: Duration = Duration::from_millis(500);

/// Embedded, debounced, migrated durable store
#[derive(Clone)]
pub struct DurableStore {
    db: sled::Db,
    entities: sled::Tree,
    idx_entity_label: sled::Tree,
    relations: sled::Tree,
    idx_active_subj_pred: sled::Tree,
    summaries: sled::Tree,
    vectors: sled::Tree,
    vectors_embedding: sled::Tree,
    access_log: sled::Tree,
    sessions: sled::Tree,
    meta: sled::Tree,
    access_log_counter: Arc<AtomicU64>,
    deadline: Arc<parking_lot::Mutex<Option<Instant>>>,
    flush_task_running: Arc<AtomicBool>,
}

impl DurableStore {
    /// Open (or create) the durable store at `data_dir/file_name`, run
    /// schema migrations, then flush once so a fresh store is durable
    /// immediately.
    pub async fn open(data_dir: &Path, file_name: &str) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(file_name);
        info!(path = %path.display(), "opening durable store");
        let db = sled::open(&path).map_err(|e| MemoryError::Storage(e.to_string()))?;

        let entities = db.open_tree("entities")?;
        let idx_entity_label = db.open_tree("idx_entity_label")?;
        let relations = db.open_tree("relations")?;
        let idx_active_subj_pred = db.open_tree("idx_active_subj_pred")?;
        let summaries = db.open_tree("summaries")?;
        let vectors = db.open_tree("vectors")?;
        let vectors_embedding = db.open_tree("vectors_embedding")?;
        let access_log = db.open_tree("access_log")?;
        let sessions = db.open_tree("sessions")?;
        let meta = db.open_tree("meta")?;

        let counter = access_log
            .iter()
            .keys()
            .filter_map(std::result::Result::ok)
            .filter_map(|k| <[u8; 8]>::try_from(k.as_ref()).ok())
            .map(u64::from_be_bytes)
            .max()
            .unwrap_or(0);

        let store = Self {
            db,
            entities,
            idx_entity_label,
            relations,
            idx_active_subj_pred,
            summaries,
            vectors,
            vectors_embedding,
            access_log,
            sessions,
            meta,
            access_log_counter: Arc::new(AtomicU64::new(counter)),
            deadline: Arc::new(parking_lot::Mutex::new(None)),
            flush_task_running: Arc::new(AtomicBool::new(false)),
        };

        schema::migrate(&store.meta)?;
        store.flush().await?;
        Ok(store)
    }

    /// Open at a fresh temp directory; for tests
    #[cfg(any(test, feature = "test-util"))]
    pub async fn open_temp() -> Result<(Self, tempfile::TempDir)> {
        let dir = tempfile::tempdir()?;
        let store = Self::open(dir.path(), "memory.db").await?;
        Ok((store, dir))
    }

    fn schedule_flush(&self) {
        *self.deadline.lock() = Some(Instant::now() + DEBOUNCE);
        if self.flush_task_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                let wait_until = *this.deadline.lock();
                let Some(wait_until) = wait_until else { break };
                let now = Instant::now();
                if wait_until <= now {
                    if let Err(e) = this.db.flush_async().await {
                        warn!("debounced flush failed, continuing in-memory: {e}");
                    }
                    *this.deadline.lock() = None;
                    break;
                }
                tokio::time::sleep(wait_until - now).await;
            }
            this.flush_task_running.store(false, Ordering::SeqCst);
        });
    }

    /// Synchronous flush; cancels the pending debounce window
    pub async fn flush(&self) -> Result<()> {
        *self.deadline.lock() = None;
        self.db
            .flush_async()
            .await
            .map_err(|e| MemoryError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Cancel the debounce timer, flush synchronously, release the handle
    pub async fn close(&self) -> Result<()> {
        self.flush().await
    }

    fn encode<T: serde::Serialize>(v: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(v).map_err(MemoryError::from)
    }

    fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(MemoryError::from)
    }

    fn label_key(label: &str) -> String {
        label.to_lowercase()
    }

    fn subj_pred_key(subject_id: &str, predicate: &str) -> String {
        format!("{subject_id}\u{0}{}", predicate.to_lowercase())
    }

    // ---- entities ----------------------------------------------------

    pub fn upsert_entity(&self, entity: &Entity) -> Result<()> {
        self.entities
            .insert(entity.id.as_bytes(), Self::encode(entity)?)?;
        self.idx_entity_label
            .insert(Self::label_key(&entity.label).as_bytes(), entity.id.as_bytes())?;
        self.schedule_flush();
        Ok(())
    }

    pub fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
        self.entities
            .get(id.as_bytes())?
            .map(|v| Self::decode(&v))
            .transpose()
    }

    pub fn find_entity_by_label(&self, label: &str) -> Result<Option<Entity>> {
        let Some(id) = self.idx_entity_label.get(Self::label_key(label).as_bytes())? else {
            return Ok(None);
        };
        let id = String::from_utf8_lossy(&id).to_string();
        self.get_entity(&id)
    }

    /// Case-insensitive substring match over labels, ordered by confidence desc
    pub fn find_entities_by_label_substring(&self, needle: &str) -> Result<Vec<Entity>> {
        let needle = needle.to_lowercase();
        let mut out = Vec::new();
        for kv in &self.entities {
            let (_, v) = kv?;
            let e: Entity = Self::decode(&v)?;
            if e.label.to_lowercase().contains(&needle) {
                out.push(e);
            }
        }
        out.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
        Ok(out)
    }

    pub fn delete_entity(&self, id: &str) -> Result<()> {
        if let Some(e) = self.get_entity(id)? {
            self.idx_entity_label.remove(Self::label_key(&e.label).as_bytes())?;
        }
        self.entities.remove(id.as_bytes())?;
        self.schedule_flush();
        Ok(())
    }

    pub fn count_entities(&self) -> Result<usize> {
        Ok(self.entities.len())
    }

    // ---- relations -----------------------------------------------------

    pub fn upsert_relation(&self, relation: &Relation) -> Result<()> {
        self.relations
            .insert(relation.id.as_bytes(), Self::encode(relation)?)?;
        let key = Self::subj_pred_key(&relation.subject_id, &relation.predicate);
        if relation.is_active() {
            self.idx_active_subj_pred
                .insert(key.as_bytes(), relation.id.as_bytes())?;
        } else if self
            .idx_active_subj_pred
            .get(key.as_bytes())?
            .is_some_and(|v| v.as_ref() == relation.id.as_bytes())
        {
            self.idx_active_subj_pred.remove(key.as_bytes())?;
        }
        self.schedule_flush();
        Ok(())
    }

    pub fn get_relation(&self, id: &str) -> Result<Option<Relation>> {
        self.relations
            .get(id.as_bytes())?
            .map(|v| Self::decode(&v))
            .transpose()
    }

    pub fn find_active_relation(&self, subject_id: &str, predicate: &str) -> Result<Option<Relation>> {
        let key = Self::subj_pred_key(subject_id, predicate);
        let Some(id) = self.idx_active_subj_pred.get(key.as_bytes())? else {
            return Ok(None);
        };
        self.get_relation(&String::from_utf8_lossy(&id))
    }

    fn all_relations(&self) -> Result<Vec<Relation>> {
        let mut out = Vec::new();
        for kv in &self.relations {
            let (_, v) = kv?;
            out.push(Self::decode(&v)?);
        }
        Ok(out)
    }

    pub fn relations_by_subject(&self, subject_id: &str) -> Result<Vec<Relation>> {
        Ok(self
            .all_relations()?
            .into_iter()
            .filter(|r| r.subject_id == subject_id)
            .collect())
    }

    pub fn relations_by_object(&self, object_id: &str) -> Result<Vec<Relation>> {
        Ok(self
            .all_relations()?
            .into_iter()
            .filter(|r| r.object_id == object_id)
            .collect())
    }

    /// Active relations whose predicate matches case-insensitively
    pub fn relations_by_predicate(&self, predicate: &str) -> Result<Vec<Relation>> {
        let predicate = predicate.to_lowercase();
        Ok(self
            .all_relations()?
            .into_iter()
            .filter(|r| r.is_active() && r.predicate.to_lowercase() == predicate)
            .collect())
    }

    pub fn delete_relation(&self, id: &str) -> Result<()> {
        if let Some(r) = self.get_relation(id)? {
            let key = Self::subj_pred_key(&r.subject_id, &r.predicate);
            if self
                .idx_active_subj_pred
                .get(key.as_bytes())?
                .is_some_and(|v| v.as_ref() == id.as_bytes())
            {
                self.idx_active_subj_pred.remove(key.as_bytes())?;
            }
        }
        self.relations.remove(id.as_bytes())?;
        self.schedule_flush();
        Ok(())
    }

    pub fn count_active_relations(&self) -> Result<usize> {
        Ok(self.all_relations()?.iter().filter(|r| r.is_active()).count())
    }

    // ---- summaries -------------------------------------------------------

    pub fn upsert_summary(&self, summary: &Summary) -> Result<()> {
        self.summaries
            .insert(summary.id.as_bytes(), Self::encode(summary)?)?;
        self.schedule_flush();
        Ok(())
    }

    pub fn get_summary(&self, id: &str) -> Result<Option<Summary>> {
        self.summaries
            .get(id.as_bytes())?
            .map(|v| Self::decode(&v))
            .transpose()
    }

    pub fn delete_summary(&self, id: &str) -> Result<()> {
        self.summaries.remove(id.as_bytes())?;
        self.schedule_flush();
        Ok(())
    }

    fn all_summaries(&self) -> Result<Vec<Summary>> {
        let mut out = Vec::new();
        for kv in &self.summaries {
            let (_, v) = kv?;
            out.push(Self::decode(&v)?);
        }
        Ok(out)
    }

    pub fn summaries_by_tier(&self, tier: Tier) -> Result<Vec<Summary>> {
        Ok(self.all_summaries()?.into_iter().filter(|s| s.tier == tier).collect())
    }

    pub fn summaries_by_tier_and_session(&self, tier: Tier, session_id: &str) -> Result<Vec<Summary>> {
        Ok(self
            .all_summaries()?
            .into_iter()
            .filter(|s| s.tier == tier && s.session_id.as_deref() == Some(session_id))
            .collect())
    }

    /// `GROUP BY tier` aggregate: (count, sum of token_count) per tier
    pub fn summary_tier_stats(&self) -> Result<HashMap<Tier, (usize, usize)>> {
        let mut stats: HashMap<Tier, (usize, usize)> = HashMap::new();
        for s in self.all_summaries()? {
            let entry = stats.entry(s.tier).or_insert((0, 0));
            entry.0 += 1;
            entry.1 += s.token_count;
        }
        Ok(stats)
    }

    // ---- vectors -----------------------------------------------------

    pub fn insert_vector(&self, record: &VectorRecord) -> Result<()> {
        let mut row = record.clone();
        let embedding = std::mem::take(&mut row.embedding);
        self.vectors.insert(record.id.as_bytes(), Self::encode(&row)?)?;
        self.vectors_embedding
            .insert(record.id.as_bytes(), crate::vector::vec_to_bytes(&embedding))?;
        self.schedule_flush();
        Ok(())
    }

    fn hydrate_vector(&self, id: &str, row_bytes: &[u8]) -> Result<VectorRecord> {
        let mut row: VectorRecord = Self::decode(row_bytes)?;
        if let Some(bytes) = self.vectors_embedding.get(id.as_bytes())? {
            row.embedding = crate::vector::bytes_to_vec(&bytes);
        }
        Ok(row)
    }

    pub fn all_vectors(&self) -> Result<Vec<VectorRecord>> {
        let mut out = Vec::new();
        for kv in &self.vectors {
            let (k, v) = kv?;
            let id = String::from_utf8_lossy(&k).to_string();
            out.push(self.hydrate_vector(&id, &v)?);
        }
        Ok(out)
    }

    pub fn delete_vector(&self, id: &str) -> Result<()> {
        self.vectors.remove(id.as_bytes())?;
        self.vectors_embedding.remove(id.as_bytes())?;
        self.schedule_flush();
        Ok(())
    }

    pub fn delete_vectors_by_source(&self, source_id: &str) -> Result<usize> {
        let ids: Vec<String> = self
            .all_vectors()?
            .into_iter()
            .filter(|v| v.source_id == source_id)
            .map(|v| v.id)
            .collect();
        let count = ids.len();
        for id in ids {
            self.delete_vector(&id)?;
        }
        Ok(count)
    }

    pub fn count_vectors(&self) -> Result<usize> {
        Ok(self.vectors.len())
    }

    // ---- access log ----------------------------------------------------

    pub fn log_access(&self, memory_id: &str, memory_type: &str) -> Result<()> {
        let id = self.access_log_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let row = AccessLogRow {
            id,
            memory_id: memory_id.to_string(),
            memory_type: memory_type.to_string(),
            accessed_at: Utc::now(),
        };
        self.access_log.insert(id.to_be_bytes(), Self::encode(&row)?)?;
        self.schedule_flush();
        Ok(())
    }

    pub fn access_count(&self, memory_id: &str) -> Result<usize> {
        let mut n = 0;
        for kv in &self.access_log {
            let (_, v) = kv?;
            let row: AccessLogRow = Self::decode(&v)?;
            if row.memory_id == memory_id {
                n += 1;
            }
        }
        Ok(n)
    }

    // ---- sessions ------------------------------------------------------

    pub fn insert_session(&self, session: &Session) -> Result<()> {
        self.sessions.insert(session.id.as_bytes(), Self::encode(session)?)?;
        self.schedule_flush();
        Ok(())
    }

    pub fn get_session_row(&self, id: &str) -> Result<Option<Session>> {
        self.sessions
            .get(id.as_bytes())?
            .map(|v| Self::decode(&v))
            .transpose()
    }

    pub fn end_session_row(&self, id: &str, ended_at: DateTime<Utc>) -> Result<()> {
        if let Some(mut s) = self.get_session_row(id)? {
            s.ended_at = Some(ended_at);
            self.insert_session(&s)?;
        }
        Ok(())
    }
}

impl Drop for DurableStore {
    fn drop(&mut self) {
        debug!("durable store handle dropped");
    }
}
