//! Embedder — lazy-initialized `text → unit vector ∈ ℝᵈ`
//!
//! Degrades to the zero vector on any failure (init or per-call) rather than
//! propagating an error, so downstream cosine-similarity code never needs a
//! branch for "no embedding available": `cosine` against a zero vector is
//! defined as zero (see [`cosine`]).

pub mod cached;
pub use cached::CachedEmbedder;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::error::{MemoryError, Result};

/// A swappable `text → fixed-length unit vector` provider
///
/// [`LocalProvider`]/[`NoneProvider`] are the two built-in implementations.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name, for introspection and logging
    fn name(&self) -> &str;

    /// Fixed output dimension
    fn dimensions(&self) -> usize;

    /// Embed a batch of texts. May fail; callers degrade to zero vectors.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Always returns zero vectors; used when `embedding.provider = "none"`
pub struct NoneProvider {
    dimensions: usize,
}

impl NoneProvider {
    #[must_use]
    pub const fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl EmbeddingProvider for NoneProvider {
    fn name(&self) -> &str {
        "none"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![0.0; self.dimensions]).collect())
    }
}

/// In-process embedding provider
///
/// The real production embedder (e.g. `Xenova/all-MiniLM-L6-v2` served
/// locally) is swappable and out of scope for this engine; this
/// implementation stands in for it with a deterministic feature-hashed
/// bag-of-tokens projection, L2-normalized to the configured dimension.
/// It is a legitimate default "local" provider (no network calls, fully
/// in-process) but is not claimed to carry semantic quality beyond a
/// lexical-overlap signal.
pub struct LocalProvider {
    dimensions: usize,
    model: String,
}

impl LocalProvider {
    #[must_use]
    pub const fn new(dimensions: usize, model: String) -> Self {
        Self { dimensions, model }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        for token in text.split_whitespace() {
            let h = fnv1a(token.to_lowercase().as_bytes());
            let idx = (h as usize) % self.dimensions;
            let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        l2_normalize(&mut v);
        v
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        debug!(model = %self.model, count = texts.len(), "embedding batch");
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity; 0 if dimensions differ or either vector has zero norm
#[must_use]
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    f64::from(dot) / (f64::from(norm_a) * f64::from(norm_b))
}

/// Lazy single-initialized embedder with latched failure semantics
///
/// Concurrent first-callers await one shared init future (via
/// [`tokio::sync::OnceCell`]). If initialization ever fails, the failure is
/// latched: subsequent calls return the zero vector and never retry.
pub struct Embedder {
    provider_factory: Box<dyn Fn() -> Result<Arc<dyn EmbeddingProvider>> + Send + Sync>,
    cell: OnceCell<Arc<dyn EmbeddingProvider>>,
    dimensions: usize,
    last_error: Mutex<Option<String>>,
}

impl Embedder {
    /// Build an embedder that lazily constructs its provider via `factory`
    /// on first use.
    pub fn new(
        dimensions: usize,
        factory: impl Fn() -> Result<Arc<dyn EmbeddingProvider>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            provider_factory: Box::new(factory),
            cell: OnceCell::new(),
            dimensions,
            last_error: Mutex::new(None),
        }
    }

    /// Fixed output dimension, known even before the provider initializes
    #[must_use]
    pub const fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Introspection: the last init error, if initialization ever failed
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    async fn provider(&self) -> Option<Arc<dyn EmbeddingProvider>> {
        if self.last_error.lock().is_some() {
            return None;
        }
        let result = self
            .cell
            .get_or_try_init(|| async { (self.provider_factory)() })
            .await;
        match result {
            Ok(p) => Some(p.clone()),
            Err(e) => {
                error!("embedder initialization failed, latching zero-vector fallback: {e}");
                *self.last_error.lock() = Some(e.to_string());
                None
            }
        }
    }

    /// Embed a single text; zero vector on any init or call failure
    pub async fn embed(&self, text: &str) -> Vec<f32> {
        self.embed_batch(std::slice::from_ref(&text.to_string()))
            .await
            .into_iter()
            .next()
            .unwrap_or_else(|| vec![0.0; self.dimensions])
    }

    /// Embed a batch of texts; zero vectors for the whole batch on failure
    pub async fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        let Some(provider) = self.provider().await else {
            return texts.iter().map(|_| vec![0.0; self.dimensions]).collect();
        };
        match provider.embed_batch(texts).await {
            Ok(v) => v,
            Err(e) => {
                warn!("embedding call failed, returning zero vectors: {e}");
                texts.iter().map(|_| vec![0.0; self.dimensions]).collect()
            }
        }
    }
}

/// Construct a provider factory from config-level provider name
pub fn make_provider(
    provider: &str,
    dimensions: usize,
    model: &str,
) -> Result<Arc<dyn EmbeddingProvider>> {
    match provider {
        "none" => Ok(Arc::new(NoneProvider::new(dimensions))),
        "local" => {
            info!(model, dimensions, "initializing local embedding provider");
            Ok(Arc::new(LocalProvider::new(dimensions, model.to_string())))
        }
        other => Err(MemoryError::Validation(format!(
            "unknown embedding provider: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_provider_is_l2_normalized() {
        let p = LocalProvider::new(384, "test".to_string());
        let v = p.embed_one("hello world");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4 || norm == 0.0);
    }

    #[tokio::test]
    async fn none_provider_is_zero() {
        let p = NoneProvider::new(8);
        let out = p.embed_batch(&["x".to_string()]).await.unwrap();
        assert_eq!(out[0], vec![0.0; 8]);
    }

    #[test]
    fn cosine_zero_on_dimension_mismatch() {
        assert_eq!(cosine(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn cosine_zero_on_zero_vector() {
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn cosine_identical_vectors_is_one() {
        let v = vec![0.6, 0.8];
        assert!((cosine(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn embedder_latches_failure_to_zero_vector() {
        let embedder = Embedder::new(4, || Err(MemoryError::Embedding("boom".into())));
        let v = embedder.embed("hello").await;
        assert_eq!(v, vec![0.0; 4]);
        assert!(embedder.last_error().is_some());
        // second call does not retry, still zero
        let v2 = embedder.embed("hello again").await;
        assert_eq!(v2, vec![0.0; 4]);
    }
}
