//! Cached embedder wrapper with LRU cache and SHA-256 content hashing
//!
//! Avoids re-embedding identical content by keying an LRU cache on the
//! SHA-256 hash of the text.

use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;

use super::Embedder;

/// Cache hit/miss counters
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    #[must_use]
    pub const fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            {
                self.hits as f64 / total as f64
            }
        }
    }
}

/// Wraps an [`Embedder`] with a transparent content-hash LRU cache
pub struct CachedEmbedder {
    inner: Arc<Embedder>,
    cache: Mutex<LruCache<String, Vec<f32>>>,
    stats: Mutex<CacheStats>,
}

impl CachedEmbedder {
    /// # Panics
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn new(inner: Arc<Embedder>, capacity: usize) -> Self {
        Self {
            inner,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).expect("cache capacity must be non-zero"),
            )),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    fn hash(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Embed a single text, consulting (and populating) the cache
    pub async fn embed(&self, text: &str) -> Vec<f32> {
        let key = Self::hash(text);
        if let Some(v) = self.cache.lock().get(&key) {
            self.stats.lock().hits += 1;
            debug!(hash = %&key[..8], "embedding cache hit");
            return v.clone();
        }
        self.stats.lock().misses += 1;
        let v = self.inner.embed(text).await;
        self.cache.lock().put(key, v.clone());
        v
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        *self.stats.lock()
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
        *self.stats.lock() = CacheStats::default();
    }

    #[must_use]
    pub const fn dimensions_of(inner: &Embedder) -> usize {
        inner.dimensions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::NoneProvider;
    use std::sync::Arc;

    #[tokio::test]
    async fn cache_hit_on_repeated_text() {
        let embedder = Arc::new(Embedder::new(4, || Ok(Arc::new(NoneProvider::new(4)))));
        let cached = CachedEmbedder::new(embedder, 10);

        cached.embed("hello").await;
        cached.embed("hello").await;

        let stats = cached.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }
}
