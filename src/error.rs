//! Error types for the memory engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, MemoryError>;

/// Errors that can occur in the memory engine
///
/// Variants map onto the failure taxonomy: `Validation` and `NotFound` are
/// reported back to callers as benign text, `Storage`/`Graph`/`Embedding` are
/// normally caught at the best-effort boundary and never escape a handler,
/// and `Invariant` signals a bug (reading before initialization) that should
/// abort the handler rather than be swallowed.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Malformed tool arguments
    #[error("Validation error: {0}")]
    Validation(String),

    /// Referenced id absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Durable store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Vector store failure
    #[error("Vector search error: {0}")]
    VectorSearch(String),

    /// Knowledge graph failure
    #[error("Knowledge graph error: {0}")]
    Graph(String),

    /// Embedding generation failure
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Must-not-happen invariant violation
    #[error("Invariant violation: {0}")]
    Invariant(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all
    #[error("{0}")]
    Other(String),
}

impl From<String> for MemoryError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}

impl From<&str> for MemoryError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}

impl From<sled::Error> for MemoryError {
    fn from(e: sled::Error) -> Self {
        Self::Storage(e.to_string())
    }
}
