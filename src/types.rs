//! Core data types shared across the memory engine
//!
//! Entities, relations, summaries, vectors and access log rows, plus the
//! in-process working entry and session records that never touch the
//! durable store directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Generate a fresh RFC-4122 id
#[must_use]
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Kind of memory passed to `memory_store`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Core,
    Fact,
    Preference,
    Event,
    Summary,
}

/// A node in the knowledge graph, looked up case-insensitively by label
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub label: String,
    #[serde(default = "default_entity_type")]
    pub entity_type: String,
    #[serde(default)]
    pub properties: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub source_summary_id: Option<String>,
}

fn default_entity_type() -> String {
    "unknown".to_string()
}

const fn default_confidence() -> f64 {
    1.0
}

impl Entity {
    #[must_use]
    pub fn new(label: String, entity_type: Option<String>, properties: Value, confidence: f64) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(),
            label,
            entity_type: entity_type.unwrap_or_else(default_entity_type),
            properties,
            created_at: now,
            updated_at: now,
            confidence,
            source_summary_id: None,
        }
    }
}

/// A directed `(subject, predicate, object)` edge with temporal supersession
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: String,
    pub subject_id: String,
    pub predicate: String,
    pub object_id: String,
    #[serde(default)]
    pub properties: Value,
    pub temporal_start: DateTime<Utc>,
    #[serde(default)]
    pub temporal_end: Option<DateTime<Utc>>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub source_summary_id: Option<String>,
}

impl Relation {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.temporal_end.is_none()
    }
}

/// A tier in the compression hierarchy
pub type Tier = u8;

/// A textual memory persisted at a tier ∈ {0,1,2,3}.
///
/// Tier 0 (working) lives only in memory as a `WorkingEntry`; rows in the
/// `summaries` table are always tier ≥ 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub id: String,
    pub tier: Tier,
    pub content: String,
    pub token_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub source_ids: Vec<String>,
    #[serde(default)]
    pub metadata: Value,
}

/// An in-memory Tier-0 record; never persisted as a row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingEntry {
    pub id: String,
    pub content: String,
    pub token_count: usize,
    pub created_at: DateTime<Utc>,
    pub session_id: String,
}

/// A vector record: id, source reference, embedding, and retrieval metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub source_id: String,
    #[serde(default = "default_source_type")]
    pub source_type: String,
    #[serde(default)]
    pub preview: String,
    pub embedding: Vec<f32>,
    pub dimensions: usize,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Value,
}

fn default_source_type() -> String {
    "raw".to_string()
}

/// A session: bounded interval of interaction with a single active id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Value,
}

/// Monotonically increasing access-log row, the frequency signal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogRow {
    pub id: u64,
    pub memory_id: String,
    pub memory_type: String,
    pub accessed_at: DateTime<Utc>,
}

/// Preview text: first ≤200 chars, with an ellipsis if truncated
#[must_use]
pub fn make_preview(text: &str) -> String {
    const LIMIT: usize = 200;
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(LIMIT).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

/// Generate a session id: millisecond timestamp prefix for lexicographic ordering
#[must_use]
pub fn generate_session_id() -> String {
    format!("{}-{}", Utc::now().timestamp_millis(), Uuid::new_v4())
}
