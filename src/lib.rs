//! LatentContext memory engine
//!
//! A per-user sidecar memory engine: hierarchical tiered storage, a hybrid
//! retriever fusing lexical/semantic/graph/recency/priority/frequency
//! signals, a budget-aware context assembler, a temporal knowledge graph,
//! and a debounced durable store. See [`engine::Engine`] for the entry
//! point the transport drives.

pub mod accountant;
pub mod assembler;
pub mod config;
pub mod embedder;
pub mod engine;
pub mod error;
pub mod facade;
pub mod graph;
pub mod manager;
pub mod prompts;
pub mod session;
pub mod store;
pub mod types;
pub mod vector;

pub use engine::Engine;
pub use error::{MemoryError, Result};
