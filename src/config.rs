//! Configuration — TOML-loaded, fully defaulted
//!
//! Every section implements [`Default`] independently so a config file can
//! override a single nested field and leave the rest at their documented
//! defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub sqlite_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            sqlite_file: "memory.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
    pub cache_capacity: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            model: "Xenova/all-MiniLM-L6-v2".to_string(),
            dimensions: 384,
            cache_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenBudgetsConfig {
    pub tier0_working: usize,
    pub tier1_session: usize,
    pub tier2_epoch: usize,
    pub tier3_core: usize,
    pub default_retrieve_budget: usize,
}

impl Default for TokenBudgetsConfig {
    fn default() -> Self {
        Self {
            tier0_working: 2000,
            tier1_session: 500,
            tier2_epoch: 300,
            tier3_core: 200,
            default_retrieve_budget: 3000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub tier0_overflow_threshold: usize,
    pub tier1_consolidation_count: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            tier0_overflow_threshold: 2500,
            tier1_consolidation_count: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub semantic_weight: f64,
    pub recency_weight: f64,
    pub priority_weight: f64,
    pub frequency_weight: f64,
    pub dedup_similarity_threshold: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            semantic_weight: 0.4,
            recency_weight: 0.3,
            priority_weight: 0.2,
            frequency_weight: 0.1,
            dedup_similarity_threshold: 0.85,
        }
    }
}

/// `assembler.mode`: which Context Assembler behavior is compiled-in active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssemblerMode {
    /// Strict session isolation: no vector search, no graph, no cross-session tiers
    SessionIsolated,
    /// Six-source cross-session fusion
    CrossSession,
}

impl Default for AssemblerMode {
    fn default() -> Self {
        Self::SessionIsolated
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerConfig {
    pub mode: AssemblerMode,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            mode: AssemblerMode::SessionIsolated,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub auto_start_on_boot: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_start_on_boot: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub token_budgets: TokenBudgetsConfig,
    pub compression: CompressionConfig,
    pub ranking: RankingConfig,
    pub assembler: AssemblerConfig,
    pub session: SessionConfig,
}

impl Config {
    /// Load from a TOML file; falls back to built-in defaults when the file
    /// is absent, and merges on top of defaults for any field it omits.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no config file found, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| crate::error::MemoryError::Validation(format!("invalid config: {e}")))?;
        Ok(config)
    }
}

/// Fluent builder for the common single-field overrides
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.storage.data_dir = dir.into();
        self
    }

    #[must_use]
    pub fn embedding_provider(mut self, provider: impl Into<String>) -> Self {
        self.config.embedding.provider = provider.into();
        self
    }

    #[must_use]
    pub const fn assembler_mode(mut self, mode: AssemblerMode) -> Self {
        self.config.assembler.mode = mode;
        self
    }

    #[must_use]
    pub fn build(self) -> Config {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_enumerated_options() {
        let c = Config::default();
        assert_eq!(c.storage.sqlite_file, "memory.db");
        assert_eq!(c.embedding.dimensions, 384);
        assert_eq!(c.token_budgets.tier0_working, 2000);
        assert_eq!(c.compression.tier0_overflow_threshold, 2500);
        assert!((c.ranking.semantic_weight - 0.4).abs() < f64::EPSILON);
        assert!(c.session.auto_start_on_boot);
        assert_eq!(c.assembler.mode, AssemblerMode::SessionIsolated);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load(Path::new("/nonexistent/path/config.toml")).unwrap();
        assert_eq!(config.storage.sqlite_file, Config::default().storage.sqlite_file);
    }

    #[test]
    fn builder_overrides_single_field() {
        let config = ConfigBuilder::new().embedding_provider("none").build();
        assert_eq!(config.embedding.provider, "none");
        assert_eq!(config.embedding.dimensions, 384);
    }
}
