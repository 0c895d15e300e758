//! Memory Manager — classification, tiered storage, compression, forget
//!
//! Owns the in-process working buffer exclusively; every other mutation
//! routes through the Durable Store, Vector Store and Knowledge Graph it
//! holds shared references to.

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::accountant::TokenAccountant;
use crate::config::{CompressionConfig, TokenBudgetsConfig};
use crate::embedder::cached::CachedEmbedder;
use crate::error::{MemoryError, Result};
use crate::graph::{infer_predicate, KnowledgeGraph};
use crate::session::SessionRegistry;
use crate::store::DurableStore;
use crate::types::{generate_id, make_preview, MemoryKind, Summary, Tier, VectorRecord, WorkingEntry};
use crate::vector::VectorStore;

/// Result of `store`
#[derive(Debug, Clone)]
pub struct StoreResult {
    pub memory_id: String,
    pub tier: Tier,
    pub entities_created: Vec<String>,
    pub facts_stored: usize,
    pub vector_id: Option<String>,
    pub session_id: String,
}

/// Per-tier aggregate for `status`
#[derive(Debug, Clone, Copy, Default)]
pub struct TierStats {
    pub count: usize,
    pub token_estimate: usize,
}

/// Full `memory_status()` payload
#[derive(Debug, Clone)]
pub struct MemoryStatus {
    pub tiers: HashMap<Tier, TierStats>,
    pub entities: usize,
    pub relations: usize,
    pub vectors: usize,
    pub session_id: Option<String>,
}

pub struct MemoryManager {
    store: Arc<DurableStore>,
    vector: Arc<VectorStore>,
    graph: Arc<KnowledgeGraph>,
    sessions: Arc<SessionRegistry>,
    embedder: Arc<CachedEmbedder>,
    accountant: TokenAccountant,
    budgets: TokenBudgetsConfig,
    compression: CompressionConfig,
    working: Mutex<Vec<WorkingEntry>>,
}

impl MemoryManager {
    #[must_use]
    pub fn new(
        store: Arc<DurableStore>,
        vector: Arc<VectorStore>,
        graph: Arc<KnowledgeGraph>,
        sessions: Arc<SessionRegistry>,
        embedder: Arc<CachedEmbedder>,
        budgets: TokenBudgetsConfig,
        compression: CompressionConfig,
    ) -> Self {
        Self {
            store,
            vector,
            graph,
            sessions,
            embedder,
            accountant: TokenAccountant::new(),
            budgets,
            compression,
            working: Mutex::new(Vec::new()),
        }
    }

    fn current_session_id(&self) -> String {
        self.sessions.current_id().unwrap_or_else(|| "none".to_string())
    }

    async fn index_vector(&self, source_id: &str, source_type: &str, content: &str, confidence: f64, session_id: &str) -> Option<String> {
        let embedding = self.embedder.embed(content).await;
        let record = VectorRecord {
            id: generate_id(),
            source_id: source_id.to_string(),
            source_type: source_type.to_string(),
            preview: make_preview(content),
            dimensions: embedding.len(),
            embedding,
            confidence,
            created_at: Utc::now(),
            metadata: json!({ "session_id": session_id }),
        };
        let id = record.id.clone();
        match self.vector.add(record) {
            Ok(()) => Some(id),
            Err(e) => {
                warn!("best-effort vector indexing failed: {e}");
                None
            }
        }
    }

    fn write_summary(&self, tier: Tier, content: String, session_id: &str, metadata: Value) -> Result<Summary> {
        let now = Utc::now();
        let summary = Summary {
            id: generate_id(),
            tier,
            token_count: self.accountant.count(&content),
            content,
            created_at: now,
            updated_at: now,
            session_id: Some(session_id.to_string()),
            source_ids: Vec::new(),
            metadata,
        };
        self.store.upsert_summary(&summary)?;
        Ok(summary)
    }

    /// Classify `content` by `kind`, route to the appropriate tier, fan out
    /// graph/vector side effects, and (for events) run overflow detection.
    pub async fn store(
        &self,
        content: &str,
        kind: MemoryKind,
        confidence: f64,
        entities: &[String],
    ) -> Result<StoreResult> {
        let session_id = self.current_session_id();
        let mut facts_stored = 0usize;

        match kind {
            MemoryKind::Fact => {
                for label in entities {
                    self.graph.ensure_entity(label, None, Value::Null, confidence)?;
                }
                if entities.len() >= 2 {
                    let predicate = infer_predicate(content);
                    for object in &entities[1..] {
                        self.graph
                            .store_fact(&entities[0], predicate, object, Value::Null, confidence, None)?;
                        facts_stored += 1;
                    }
                }
            }
            MemoryKind::Preference => {
                for label in entities {
                    self.graph.ensure_entity(label, None, Value::Null, confidence)?;
                }
                self.graph.ensure_entity("User", None, Value::Null, 1.0)?;
                for label in entities {
                    self.graph
                        .store_fact("User", "prefers", label, Value::Null, confidence, None)?;
                    facts_stored += 1;
                }
            }
            MemoryKind::Event => {
                for label in entities {
                    self.graph.ensure_entity(label, None, Value::Null, confidence)?;
                }
            }
            MemoryKind::Core | MemoryKind::Summary => {}
        }

        let (memory_id, tier, vector_id) = match kind {
            MemoryKind::Core => {
                let summary = self.write_summary(3, content.to_string(), &session_id, Value::Null)?;
                let vector_id = self.index_vector(&summary.id, "core", content, confidence, &session_id).await;
                (summary.id, 3, vector_id)
            }
            MemoryKind::Fact => {
                let summary = self.write_summary(1, content.to_string(), &session_id, Value::Null)?;
                let vector_id = self.index_vector(&summary.id, "fact", content, confidence, &session_id).await;
                (summary.id, 1, vector_id)
            }
            MemoryKind::Preference => {
                let summary = self.write_summary(2, content.to_string(), &session_id, Value::Null)?;
                let vector_id = self.index_vector(&summary.id, "preference", content, confidence, &session_id).await;
                (summary.id, 2, vector_id)
            }
            MemoryKind::Summary => {
                let summary = self.write_summary(1, content.to_string(), &session_id, Value::Null)?;
                let vector_id = self.index_vector(&summary.id, "summary", content, confidence, &session_id).await;
                (summary.id, 1, vector_id)
            }
            MemoryKind::Event => {
                let entry = WorkingEntry {
                    id: generate_id(),
                    content: content.to_string(),
                    token_count: self.accountant.count(content),
                    created_at: Utc::now(),
                    session_id: session_id.clone(),
                };
                let id = entry.id.clone();
                self.working.lock().push(entry);
                let vector_id = self.index_vector(&id, "event", content, confidence, &session_id).await;
                self.check_overflow(&session_id).await;
                (id, 0, vector_id)
            }
        };

        Ok(StoreResult {
            memory_id,
            tier,
            entities_created: entities.to_vec(),
            facts_stored,
            vector_id,
            session_id,
        })
    }

    /// Runs at most once per insert; takes the oldest half of the current
    /// session's working entries once their combined tokens exceed the
    /// overflow threshold.
    async fn check_overflow(&self, session_id: &str) {
        let total: usize = {
            let buf = self.working.lock();
            buf.iter().filter(|e| e.session_id == session_id).map(|e| e.token_count).sum()
        };
        if total <= self.compression.tier0_overflow_threshold {
            return;
        }

        let to_compress: Vec<WorkingEntry> = {
            let mut buf = self.working.lock();
            let mut indices: Vec<usize> = buf
                .iter()
                .enumerate()
                .filter(|(_, e)| e.session_id == session_id)
                .map(|(i, _)| i)
                .collect();
            indices.sort_by_key(|&i| buf[i].created_at);
            let half = indices.len() / 2;
            let chosen: Vec<usize> = indices.into_iter().take(half).collect();
            let mut taken = Vec::with_capacity(chosen.len());
            for &i in chosen.iter().rev() {
                taken.push(buf.remove(i));
            }
            taken.reverse();
            taken
        };

        if to_compress.is_empty() {
            return;
        }

        let original_tokens: usize = to_compress.iter().map(|e| e.token_count).sum();
        let original_count = to_compress.len();
        let source_ids: Vec<String> = to_compress.iter().map(|e| e.id.clone()).collect();
        let joined = to_compress.iter().map(|e| e.content.as_str()).collect::<Vec<_>>().join("\n");
        let (truncated, _) = self.accountant.truncate(&joined, self.budgets.tier1_session);

        let metadata = json!({ "type": "auto_compressed", "originalCount": original_count, "originalTokens": original_tokens });
        match self.write_summary(1, truncated.clone(), session_id, metadata) {
            Ok(mut summary) => {
                summary.source_ids = source_ids;
                if let Err(e) = self.store.upsert_summary(&summary) {
                    warn!("failed to persist auto-compress source_ids: {e}");
                }
                let _ = self.index_vector(&summary.id, "summary", &truncated, 1.0, session_id).await;
            }
            Err(e) => warn!("auto-compress summary write failed: {e}"),
        }
    }

    /// `compress(scope)`; returns a human-readable report.
    pub async fn compress(&self, scope: &str) -> Result<String> {
        match scope {
            "working" => self.compress_working().await,
            "session" => self.compress_session().await,
            "epoch" => self.compress_epoch().await,
            other => Err(MemoryError::Validation(format!("unknown compress scope: {other}"))),
        }
    }

    async fn compress_working(&self) -> Result<String> {
        let session_id = self.current_session_id();
        let entries: Vec<WorkingEntry> = {
            let mut buf = self.working.lock();
            let (matching, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut *buf).into_iter().partition(|e| e.session_id == session_id);
            *buf = rest;
            matching
        };
        if entries.is_empty() {
            return Ok("nothing to compress: working buffer is empty".to_string());
        }
        let original_tokens: usize = entries.iter().map(|e| e.token_count).sum();
        let joined = entries.iter().map(|e| e.content.as_str()).collect::<Vec<_>>().join("\n");
        let (truncated, compressed_tokens) = self.accountant.truncate(&joined, self.budgets.tier1_session);
        let mut summary = self.write_summary(
            1,
            truncated.clone(),
            &session_id,
            json!({ "type": "manual_compress_working", "originalCount": entries.len(), "originalTokens": original_tokens }),
        )?;
        summary.source_ids = entries.iter().map(|e| e.id.clone()).collect();
        self.store.upsert_summary(&summary)?;
        let _ = self.index_vector(&summary.id, "summary", &truncated, 1.0, &session_id).await;

        let ratio = original_tokens as f64 / (compressed_tokens.max(1)) as f64;
        Ok(format!(
            "compressed {} working entries ({original_tokens} → {compressed_tokens} tokens, ratio {ratio:.1})",
            summary.source_ids.len()
        ))
    }

    async fn compress_session(&self) -> Result<String> {
        let tier1: Vec<Summary> = self.store.summaries_by_tier(1)?;
        if tier1.len() < 2 {
            return Ok("not enough Tier-1 summaries to consolidate".to_string());
        }
        let session_id = self.current_session_id();
        let original_tokens: usize = tier1.iter().map(|s| s.token_count).sum();
        let joined = tier1.iter().map(|s| s.content.as_str()).collect::<Vec<_>>().join("\n\n");
        let (truncated, compressed_tokens) = self.accountant.truncate(&joined, self.budgets.tier1_session * 2);
        let mut summary = self.write_summary(
            1,
            truncated.clone(),
            &session_id,
            json!({ "type": "manual_compress_session", "originalCount": tier1.len(), "originalTokens": original_tokens }),
        )?;
        summary.source_ids = tier1.iter().map(|s| s.id.clone()).collect();
        self.store.upsert_summary(&summary)?;
        let _ = self.index_vector(&summary.id, "summary", &truncated, 1.0, &session_id).await;

        for old in &tier1 {
            self.vector.delete_by_source(&old.id)?;
            self.store.delete_summary(&old.id)?;
        }

        Ok(format!(
            "consolidated {} Tier-1 summaries into one ({original_tokens} → {compressed_tokens} tokens)",
            tier1.len()
        ))
    }

    async fn compress_epoch(&self) -> Result<String> {
        let tier1: Vec<Summary> = self.store.summaries_by_tier(1)?;
        if tier1.len() < self.compression.tier1_consolidation_count {
            return Ok(format!(
                "not enough Tier-1 summaries for an epoch: have {}, need {}",
                tier1.len(),
                self.compression.tier1_consolidation_count
            ));
        }
        let session_id = self.current_session_id();
        let original_tokens: usize = tier1.iter().map(|s| s.token_count).sum();
        let joined = tier1.iter().map(|s| s.content.as_str()).collect::<Vec<_>>().join("\n\n");
        let (truncated, compressed_tokens) = self.accountant.truncate(&joined, self.budgets.tier2_epoch);
        let mut summary = self.write_summary(
            2,
            truncated.clone(),
            &session_id,
            json!({ "type": "epoch_consolidation", "originalCount": tier1.len(), "originalTokens": original_tokens }),
        )?;
        summary.source_ids = tier1.iter().map(|s| s.id.clone()).collect();
        self.store.upsert_summary(&summary)?;
        let _ = self.index_vector(&summary.id, "summary", &truncated, 1.0, &session_id).await;

        for old in &tier1 {
            self.vector.delete_by_source(&old.id)?;
            self.store.delete_summary(&old.id)?;
        }

        Ok(format!(
            "consolidated {} Tier-1 summaries into one Tier-2 epoch ({original_tokens} → {compressed_tokens} tokens)",
            tier1.len()
        ))
    }

    /// `forget(id, action, correction?)`
    pub async fn forget(&self, memory_id: &str, action: &str, correction: Option<&str>) -> Result<String> {
        if let Some(mut summary) = self.store.get_summary(memory_id)? {
            return match action {
                "delete" => {
                    self.vector.delete_by_source(memory_id)?;
                    self.store.delete_summary(memory_id)?;
                    Ok(format!("deleted memory {memory_id}"))
                }
                "deprecate" => {
                    summary.content = format!("[DEPRECATED] {}", summary.content);
                    summary.token_count += 15;
                    summary.updated_at = Utc::now();
                    self.store.upsert_summary(&summary)?;
                    Ok(format!("deprecated memory {memory_id}"))
                }
                "correct" => {
                    let Some(correction) = correction else {
                        return Err(MemoryError::Validation("correct requires a correction".to_string()));
                    };
                    summary.content = correction.to_string();
                    summary.token_count = self.accountant.count(correction);
                    summary.updated_at = Utc::now();
                    self.store.upsert_summary(&summary)?;
                    self.vector.delete_by_source(memory_id)?;
                    let session_id = summary.session_id.clone().unwrap_or_else(|| self.current_session_id());
                    let _ = self.index_vector(memory_id, "summary", correction, 1.0, &session_id).await;
                    Ok(format!("corrected memory {memory_id}"))
                }
                other => Err(MemoryError::Validation(format!("unknown forget action: {other}"))),
            };
        }

        let mut buf = self.working.lock();
        if let Some(pos) = buf.iter().position(|e| e.id == memory_id) {
            return match action {
                "delete" => {
                    buf.remove(pos);
                    Ok(format!("deleted working entry {memory_id}"))
                }
                "correct" => {
                    let Some(correction) = correction else {
                        return Err(MemoryError::Validation("correct requires a correction".to_string()));
                    };
                    buf[pos].content = correction.to_string();
                    buf[pos].token_count = self.accountant.count(correction);
                    Ok(format!("corrected working entry {memory_id}"))
                }
                "deprecate" => Ok(format!("deprecate is a no-op for working entry {memory_id}")),
                other => Err(MemoryError::Validation(format!("unknown forget action: {other}"))),
            };
        }

        Ok(format!("not found: {memory_id}"))
    }

    /// Archive all working entries tagged with `session_id` into one Tier-1
    /// summary, purging them from the buffer. Returns `None` if there was
    /// nothing to archive.
    pub async fn archive_working(&self, session_id: &str) -> Result<Option<String>> {
        let entries: Vec<WorkingEntry> = {
            let mut buf = self.working.lock();
            let (matching, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut *buf).into_iter().partition(|e| e.session_id == session_id);
            *buf = rest;
            matching
        };
        if entries.is_empty() {
            return Ok(None);
        }
        let original_tokens: usize = entries.iter().map(|e| e.token_count).sum();
        let joined = entries.iter().map(|e| e.content.as_str()).collect::<Vec<_>>().join("\n");
        let (truncated, compressed_tokens) = self.accountant.truncate(&joined, self.budgets.tier1_session);
        let mut summary = self.write_summary(
            1,
            truncated.clone(),
            session_id,
            json!({ "type": "session_archive", "originalCount": entries.len(), "originalTokens": original_tokens }),
        )?;
        summary.source_ids = entries.iter().map(|e| e.id.clone()).collect();
        self.store.upsert_summary(&summary)?;
        let _ = self.index_vector(&summary.id, "summary", &truncated, 1.0, session_id).await;

        Ok(Some(format!(
            "archived {} entries ({original_tokens} → {compressed_tokens} tokens)",
            summary.source_ids.len()
        )))
    }

    /// Empty the working buffer unconditionally.
    pub fn clear_working(&self) {
        self.working.lock().clear();
    }

    pub fn working_entries_for(&self, session_id: &str) -> Vec<WorkingEntry> {
        self.working.lock().iter().filter(|e| e.session_id == session_id).cloned().collect()
    }

    pub fn status(&self) -> Result<MemoryStatus> {
        let session_id = self.sessions.current_id();
        let mut tiers: HashMap<Tier, TierStats> = HashMap::new();

        let current_session = session_id.clone().unwrap_or_default();
        let buf = self.working.lock();
        let tier0 = buf.iter().filter(|e| e.session_id == current_session);
        let (count, tokens) = tier0.fold((0usize, 0usize), |(c, t), e| (c + 1, t + e.token_count));
        drop(buf);
        tiers.insert(0, TierStats { count, token_estimate: tokens });

        for (tier, (count, tokens)) in self.store.summary_tier_stats()? {
            tiers.insert(tier, TierStats { count, token_estimate: tokens });
        }

        Ok(MemoryStatus {
            tiers,
            entities: self.graph.entity_count()?,
            relations: self.graph.active_relation_count()?,
            vectors: self.vector.count()?,
            session_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::cached::CachedEmbedder;
    use crate::embedder::{make_provider, Embedder};

    async fn fresh() -> (MemoryManager, tempfile::TempDir) {
        let (store, dir) = DurableStore::open_temp().await.unwrap();
        let store = Arc::new(store);
        let vector = Arc::new(VectorStore::new(store.clone()));
        let graph = Arc::new(KnowledgeGraph::new(store.clone()));
        let sessions = Arc::new(SessionRegistry::new(store.clone()));
        sessions.start(None).await.unwrap();
        let raw_embedder = Arc::new(Embedder::new(8, || make_provider("none", 8, "none")));
        let embedder = Arc::new(CachedEmbedder::new(raw_embedder, 64));
        let manager = MemoryManager::new(
            store,
            vector,
            graph,
            sessions,
            embedder,
            TokenBudgetsConfig::default(),
            CompressionConfig {
                tier0_overflow_threshold: 50,
                tier1_consolidation_count: 10,
            },
        );
        (manager, dir)
    }

    #[tokio::test]
    async fn fact_with_two_entities_stores_one_relation() {
        let (manager, _dir) = fresh().await;
        let result = manager
            .store("User lives in Paris.", MemoryKind::Fact, 1.0, &["User".into(), "Paris".into()])
            .await
            .unwrap();
        assert_eq!(result.tier, 1);
        assert_eq!(result.facts_stored, 1);
        assert_eq!(result.entities_created, vec!["User".to_string(), "Paris".to_string()]);
    }

    #[tokio::test]
    async fn auto_compress_triggers_on_overflow() {
        let (manager, _dir) = fresh().await;
        for _ in 0..6 {
            manager
                .store("one two three four five six seven eight nine ten.", MemoryKind::Event, 1.0, &[])
                .await
                .unwrap();
        }
        let tier1 = manager.store.summaries_by_tier(1).unwrap();
        assert_eq!(tier1.len(), 1);
        assert_eq!(tier1[0].source_ids.len(), 3);

        let remaining: usize = manager.working.lock().iter().map(|e| e.token_count).sum();
        assert!(remaining <= 50);
    }

    #[tokio::test]
    async fn forget_delete_purges_vector() {
        let (manager, _dir) = fresh().await;
        let result = manager
            .store("User likes dark mode a lot I guess today.", MemoryKind::Preference, 1.0, &["dark mode".into()])
            .await
            .unwrap();
        manager.forget(&result.memory_id, "delete", None).await.unwrap();
        assert!(manager.store.get_summary(&result.memory_id).unwrap().is_none());
        assert_eq!(manager.vector.count().unwrap(), 0);
    }
}
