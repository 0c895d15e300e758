//! Vector Store — brute-force cosine top-k over an in-process cache backed
//! by the durable store
//!
//! Not an ANN index: at personal-store scale a linear scan is fast enough
//! and has no index-staleness failure mode. The cache is the full set of
//! [`VectorRecord`]s kept in memory; writes go through the durable store
//! first and then mark the cache stale, so a search after a write always
//! re-reads from disk once rather than serving undercounted results.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::embedder::cosine;
use crate::error::Result;
use crate::store::DurableStore;
use crate::types::VectorRecord;

/// float32 little-endian, in index order — the on-disk embedding layout
#[must_use]
pub fn vec_to_bytes(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

/// Inverse of [`vec_to_bytes`]; ignores a trailing partial element
#[must_use]
pub fn bytes_to_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// A metadata filter applied before scoring, so a search over 10k facts for
/// one session doesn't score vectors that could never match.
#[derive(Debug, Clone, Default)]
pub struct VectorFilter {
    /// Empty means "no restriction"; otherwise `record.source_type` must be
    /// one of these.
    pub source_types: Vec<String>,
    pub session_id: Option<String>,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    pub min_confidence: Option<f64>,
}

impl VectorFilter {
    fn matches(&self, record: &VectorRecord) -> bool {
        if !self.source_types.is_empty() && !self.source_types.iter().any(|st| st == &record.source_type) {
            return false;
        }
        if let Some(sid) = &self.session_id {
            if record.metadata.get("session_id").and_then(|v| v.as_str()) != Some(sid.as_str()) {
                return false;
            }
        }
        if let Some(after) = self.after {
            if record.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.before {
            if record.created_at > before {
                return false;
            }
        }
        if let Some(min_confidence) = self.min_confidence {
            if record.confidence < min_confidence {
                return false;
            }
        }
        true
    }
}

/// A scored search hit: the record and its cosine similarity to the query
#[derive(Debug, Clone)]
pub struct ScoredVector {
    pub record: VectorRecord,
    pub score: f64,
}

struct Cache {
    records: Vec<VectorRecord>,
    stale: bool,
}

/// Brute-force vector index over the durable store's `vectors` table
pub struct VectorStore {
    store: Arc<DurableStore>,
    cache: parking_lot::Mutex<Cache>,
}

impl VectorStore {
    #[must_use]
    pub fn new(store: Arc<DurableStore>) -> Self {
        Self {
            store,
            cache: parking_lot::Mutex::new(Cache {
                records: Vec::new(),
                stale: true,
            }),
        }
    }

    fn refresh_if_stale(&self) -> Result<()> {
        let mut cache = self.cache.lock();
        if cache.stale {
            cache.records = self.store.all_vectors()?;
            cache.stale = false;
        }
        Ok(())
    }

    pub fn add(&self, record: VectorRecord) -> Result<()> {
        self.store.insert_vector(&record)?;
        self.cache.lock().stale = true;
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.store.delete_vector(id)?;
        self.cache.lock().stale = true;
        Ok(())
    }

    /// Delete every vector whose `source_id` matches, returning the count removed
    pub fn delete_by_source(&self, source_id: &str) -> Result<usize> {
        let n = self.store.delete_vectors_by_source(source_id)?;
        self.cache.lock().stale = true;
        Ok(n)
    }

    /// Top-`k` by cosine similarity to `query`, highest first; ties broken
    /// by insertion order (stable sort over the cache's natural order).
    pub fn search_by_embedding(
        &self,
        query: &[f32],
        k: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<ScoredVector>> {
        self.refresh_if_stale()?;
        let cache = self.cache.lock();
        let mut scored: Vec<ScoredVector> = cache
            .records
            .iter()
            .filter(|r| filter.matches(r))
            .map(|r| ScoredVector {
                record: r.clone(),
                score: cosine(query, &r.embedding),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        debug!(hits = scored.len(), "vector search");
        Ok(scored)
    }

    pub fn count(&self) -> Result<usize> {
        self.store.count_vectors()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn record(id: &str, source_id: &str, embedding: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            source_id: source_id.to_string(),
            source_type: "raw".to_string(),
            preview: String::new(),
            dimensions: embedding.len(),
            embedding,
            confidence: 1.0,
            created_at: Utc::now(),
            metadata: json!({}),
        }
    }

    #[test]
    fn byte_round_trip_is_exact() {
        let v = vec![1.0f32, -2.5, 0.0, std::f32::consts::PI];
        assert_eq!(bytes_to_vec(&vec_to_bytes(&v)), v);
    }

    #[tokio::test]
    async fn search_ranks_by_cosine_and_respects_k() {
        let (store, _dir) = DurableStore::open_temp().await.unwrap();
        let vs = VectorStore::new(Arc::new(store));
        vs.add(record("a", "s1", vec![1.0, 0.0])).unwrap();
        vs.add(record("b", "s2", vec![0.0, 1.0])).unwrap();
        vs.add(record("c", "s3", vec![0.9, 0.1])).unwrap();

        let hits = vs
            .search_by_embedding(&[1.0, 0.0], 2, &VectorFilter::default())
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.id, "a");
        assert_eq!(hits[1].record.id, "c");
    }

    #[tokio::test]
    async fn delete_by_source_removes_all_matching() {
        let (store, _dir) = DurableStore::open_temp().await.unwrap();
        let vs = VectorStore::new(Arc::new(store));
        vs.add(record("a", "s1", vec![1.0, 0.0])).unwrap();
        vs.add(record("b", "s1", vec![0.0, 1.0])).unwrap();
        vs.add(record("c", "s2", vec![1.0, 1.0])).unwrap();

        let n = vs.delete_by_source("s1").unwrap();
        assert_eq!(n, 2);
        assert_eq!(vs.count().unwrap(), 1);
    }
}
