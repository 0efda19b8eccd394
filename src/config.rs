//! Engine configuration, persisted as TOML.
//!
//! Every field has a serde default, so a config file only needs the values
//! it changes. An empty file is the default configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, NoesisResult};

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory for `noesis.redb`. `None` runs memory-only.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    #[serde(default)]
    pub exploration: ExplorationConfig,
    #[serde(default)]
    pub hyper: HyperConfig,
    /// Text extraction service. `None` disables extraction.
    #[serde(default)]
    pub extractor: Option<ExtractorConfig>,
}

/// Query cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
    /// Time-to-live from insertion.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Clear the cache after every write to a store.
    #[serde(default = "default_true")]
    pub invalidate_on_write: bool,
    /// Number of recent query metrics kept.
    #[serde(default = "default_metrics_window")]
    pub metrics_window: usize,
}

fn default_max_entries() -> u64 {
    1024
}
fn default_ttl_secs() -> u64 {
    60
}
fn default_true() -> bool {
    true
}
fn default_metrics_window() -> usize {
    256
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            ttl_secs: default_ttl_secs(),
            invalidate_on_write: default_true(),
            metrics_window: default_metrics_window(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Reasoning core settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningConfig {
    /// Store deductive conclusions back into the triple store.
    #[serde(default = "default_true")]
    pub write_back: bool,
    /// Forward-chaining rounds per deduction.
    #[serde(default = "default_max_deduction_depth")]
    pub max_deduction_depth: usize,
    /// Cap on conclusions one rule contributes to a single pass.
    #[serde(default = "default_max_inferred_per_rule")]
    pub max_inferred_per_rule: usize,
    /// Register inductive generalizations as patterns.
    #[serde(default = "default_true")]
    pub learn_patterns: bool,
}

fn default_max_deduction_depth() -> usize {
    3
}
fn default_max_inferred_per_rule() -> usize {
    256
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            write_back: default_true(),
            max_deduction_depth: default_max_deduction_depth(),
            max_inferred_per_rule: default_max_inferred_per_rule(),
            learn_patterns: default_true(),
        }
    }
}

/// Exploration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplorationConfig {
    /// Minimum element similarity for an analogy mapping.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Upper bound on `count` for candidate generation.
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
}

fn default_similarity_threshold() -> f32 {
    0.3
}
fn default_max_candidates() -> usize {
    64
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            max_candidates: default_max_candidates(),
        }
    }
}

/// Hypergraph defaults, used when a request leaves them unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperConfig {
    #[serde(default = "default_edge_confidence")]
    pub default_confidence: f32,
    #[serde(default = "default_max_depth")]
    pub default_max_depth: usize,
    #[serde(default = "default_min_confidence")]
    pub default_min_confidence: f32,
}

fn default_edge_confidence() -> f32 {
    0.8
}
fn default_max_depth() -> usize {
    2
}
fn default_min_confidence() -> f32 {
    0.6
}

impl Default for HyperConfig {
    fn default() -> Self {
        Self {
            default_confidence: default_edge_confidence(),
            default_max_depth: default_max_depth(),
            default_min_confidence: default_min_confidence(),
        }
    }
}

/// Ollama-compatible extraction endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractorConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:11434".into()
}
fn default_timeout_secs() -> u64 {
    120
}

impl EngineConfig {
    /// A memory-only config with every default.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// A durable config rooted at `dir`.
    pub fn with_data_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(dir.into()),
            ..Default::default()
        }
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> NoesisResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| EngineError::ConfigRead {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| EngineError::ConfigParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a TOML file, creating parent directories.
    pub fn save(&self, path: &Path) -> NoesisResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| EngineError::ConfigParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EngineError::ConfigWrite {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| EngineError::ConfigWrite {
            path: path.display().to_string(),
            source: e,
        })?;
        Ok(())
    }

    /// Reject settings no engine can run with.
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |message: &str| EngineError::InvalidConfig {
            message: message.to_string(),
        };
        if self.cache.max_entries == 0 {
            return Err(invalid("cache.max_entries must be at least 1"));
        }
        if self.cache.ttl_secs == 0 {
            return Err(invalid("cache.ttl_secs must be at least 1"));
        }
        if self.cache.metrics_window == 0 {
            return Err(invalid("cache.metrics_window must be at least 1"));
        }
        if self.reasoning.max_deduction_depth == 0 {
            return Err(invalid("reasoning.max_deduction_depth must be at least 1"));
        }
        if self.reasoning.max_inferred_per_rule == 0 {
            return Err(invalid("reasoning.max_inferred_per_rule must be at least 1"));
        }
        if self.exploration.max_candidates == 0 {
            return Err(invalid("exploration.max_candidates must be at least 1"));
        }
        for (name, value) in [
            (
                "exploration.similarity_threshold",
                self.exploration.similarity_threshold,
            ),
            ("hyper.default_confidence", self.hyper.default_confidence),
            (
                "hyper.default_min_confidence",
                self.hyper.default_min_confidence,
            ),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(EngineError::InvalidConfig {
                    message: format!("{name} must be within [0, 1], got {value}"),
                });
            }
        }
        if let Some(extractor) = &self.extractor {
            if extractor.model.trim().is_empty() {
                return Err(invalid("extractor.model must not be empty"));
            }
        }
        Ok(())
    }
}
