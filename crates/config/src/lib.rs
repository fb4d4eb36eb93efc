//! Configuration loading, validation, and management for ctxkit.
//!
//! Loads configuration from `~/.ctxkit/config.toml` with environment
//! variable overrides. Every scoring weight and point budget the engine
//! uses lives here so changes are auditable in one place.

use ctxkit_core::model::ModelCatalog;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.ctxkit/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model used when the caller does not name one
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Context pipeline options
    #[serde(default)]
    pub context: ContextConfig,

    /// Result cache options
    #[serde(default)]
    pub cache: CacheConfig,

    /// Per-model context limit overrides
    #[serde(default)]
    pub models: HashMap<String, ModelOverride>,

    /// Relevance scoring weights
    #[serde(default)]
    pub scoring: ScoringWeights,

    /// Token-budget packing priority points
    #[serde(default)]
    pub priority: PriorityWeights,

    /// Second-pass packing triggers
    #[serde(default)]
    pub packing: PackingConfig,

    /// Query-driven selection strategy parameters
    #[serde(default)]
    pub strategy: StrategyConfig,
}

fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_true() -> bool {
    true
}

/// Order of the two message-reducing pipeline steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineOrder {
    /// Summarize, then window, then compress.
    #[default]
    SummarizeFirst,
    /// Window, then summarize, then compress.
    WindowFirst,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_true")]
    pub auto_summarize: bool,

    #[serde(default = "default_true")]
    pub sliding_window: bool,

    /// Extra tokens of messages kept before the window boundary
    #[serde(default = "default_window_overlap")]
    pub window_overlap_tokens: usize,

    /// Lexical compression level, 0 (off) to 5 (aggressive)
    #[serde(default)]
    pub compression_level: u8,

    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f64,

    #[serde(default)]
    pub pipeline_order: PipelineOrder,

    /// Share of the context window kept verbatim after a new summary
    #[serde(default = "default_summary_recent_ratio")]
    pub summary_recent_ratio: f64,
}

fn default_window_overlap() -> usize {
    200
}
fn default_relevance_threshold() -> f64 {
    0.3
}
fn default_summary_recent_ratio() -> f64 {
    0.25
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            auto_summarize: true,
            sliding_window: true,
            window_overlap_tokens: default_window_overlap(),
            compression_level: 0,
            relevance_threshold: default_relevance_threshold(),
            pipeline_order: PipelineOrder::default(),
            summary_recent_ratio: default_summary_recent_ratio(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of cached results
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// Entry lifetime in seconds; zero or negative disables expiry
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: i64,
}

fn default_cache_capacity() -> usize {
    100
}
fn default_cache_ttl() -> i64 {
    3600
}

impl CacheConfig {
    /// The configured TTL, or `None` when entries never expire.
    pub fn ttl(&self) -> Option<Duration> {
        u64::try_from(self.ttl_secs)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl(),
        }
    }
}

/// Context limit overrides for one model id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summarize_threshold: Option<usize>,
}

/// Weights of the six relevance factors. Must sum to 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub content_similarity: f64,
    pub recency: f64,
    pub role: f64,
    pub length: f64,
    pub code_presence: f64,
    pub qa_pattern: f64,
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.content_similarity
            + self.recency
            + self.role
            + self.length
            + self.code_presence
            + self.qa_pattern
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            content_similarity: 0.40,
            recency: 0.20,
            role: 0.15,
            length: 0.10,
            code_presence: 0.10,
            qa_pattern: 0.05,
        }
    }
}

/// Point budgets for the 0-100 packing priority score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityWeights {
    pub recency_points: f64,
    pub content_points: f64,
    pub role_points: f64,
    pub length_points: f64,
    pub reference_points: f64,

    // Content-type bonuses, capped at `content_points`
    pub code_bonus: f64,
    pub error_bonus: f64,
    pub question_bonus: f64,
    pub decision_bonus: f64,
}

impl PriorityWeights {
    pub fn max_score(&self) -> f64 {
        self.recency_points
            + self.content_points
            + self.role_points
            + self.length_points
            + self.reference_points
    }
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            recency_points: 30.0,
            content_points: 25.0,
            role_points: 20.0,
            length_points: 15.0,
            reference_points: 10.0,
            code_bonus: 15.0,
            error_bonus: 10.0,
            question_bonus: 8.0,
            decision_bonus: 12.0,
        }
    }
}

/// When the greedy packer makes its second, smallest-first pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackingConfig {
    /// Trigger when fewer than this share of candidates were admitted.
    pub second_pass_admit_ratio: f64,
    /// ...and the budget is used below this share.
    pub second_pass_utilization: f64,
}

impl Default for PackingConfig {
    fn default() -> Self {
        Self {
            second_pass_admit_ratio: 0.5,
            second_pass_utilization: 0.8,
        }
    }
}

/// Parameters the smart selector derives its strategy from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub base_budget_ratio: f64,
    pub base_threshold: f64,
    pub base_recent_count: usize,
    pub code_threshold: f64,
    pub question_recent_count: usize,
    pub debugging_threshold: f64,
    pub summary_threshold: f64,
    pub whole_conversation_budget_ratio: f64,
    pub whole_conversation_threshold: f64,
    pub whole_conversation_recent_count: usize,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            base_budget_ratio: 0.8,
            base_threshold: 0.3,
            base_recent_count: 5,
            code_threshold: 0.4,
            question_recent_count: 10,
            debugging_threshold: 0.2,
            summary_threshold: 0.5,
            whole_conversation_budget_ratio: 0.95,
            whole_conversation_threshold: 0.2,
            whole_conversation_recent_count: 20,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.ctxkit/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `CTXKIT_MODEL`
    /// - `CTXKIT_COMPRESSION_LEVEL`
    /// - `CTXKIT_CACHE_ENABLED`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_file(&Self::config_dir().join("config.toml"))
    }

    /// Load configuration from `path`, then apply environment overrides.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(model) = std::env::var("CTXKIT_MODEL") {
            self.default_model = model;
        }

        if let Ok(level) = std::env::var("CTXKIT_COMPRESSION_LEVEL") {
            self.context.compression_level = level.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "CTXKIT_COMPRESSION_LEVEL must be an integer 0-5, got {level:?}"
                ))
            })?;
        }

        if let Ok(enabled) = std::env::var("CTXKIT_CACHE_ENABLED") {
            match enabled.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.cache.enabled = true,
                "0" | "false" | "no" | "off" => self.cache.enabled = false,
                other => {
                    tracing::warn!(value = other, "Ignoring unrecognized CTXKIT_CACHE_ENABLED")
                }
            }
        }

        self.validate()
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".ctxkit")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.context.compression_level > 5 {
            return Err(ConfigError::ValidationError(format!(
                "context.compression_level must be between 0 and 5, got {}",
                self.context.compression_level
            )));
        }

        if !(0.0..=1.0).contains(&self.context.relevance_threshold) {
            return Err(ConfigError::ValidationError(
                "context.relevance_threshold must be between 0.0 and 1.0".into(),
            ));
        }

        if !(0.0..1.0).contains(&self.context.summary_recent_ratio) {
            return Err(ConfigError::ValidationError(
                "context.summary_recent_ratio must be in [0.0, 1.0)".into(),
            ));
        }

        if self.cache.enabled && self.cache.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "cache.capacity must be > 0 when the cache is enabled".into(),
            ));
        }

        if (self.scoring.sum() - 1.0).abs() > 1e-6 {
            return Err(ConfigError::ValidationError(format!(
                "scoring weights must sum to 1.0, got {:.4}",
                self.scoring.sum()
            )));
        }

        let ratios = [
            ("strategy.base_budget_ratio", self.strategy.base_budget_ratio),
            (
                "strategy.whole_conversation_budget_ratio",
                self.strategy.whole_conversation_budget_ratio,
            ),
            ("packing.second_pass_admit_ratio", self.packing.second_pass_admit_ratio),
            ("packing.second_pass_utilization", self.packing.second_pass_utilization),
        ];
        for (name, value) in ratios {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be between 0.0 and 1.0"
                )));
            }
        }

        for (model, o) in &self.models {
            if o.context_window == Some(0) {
                return Err(ConfigError::ValidationError(format!(
                    "models.{model}.context_window must be > 0"
                )));
            }
        }

        Ok(())
    }

    /// Build the model catalog: built-in defaults plus `[models]` overrides.
    pub fn model_catalog(&self) -> ModelCatalog {
        let catalog = ModelCatalog::with_defaults();
        for (model, o) in &self.models {
            catalog.apply_override(model, o.context_window, o.summarize_threshold);
        }
        catalog
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            context: ContextConfig::default(),
            cache: CacheConfig::default(),
            models: HashMap::new(),
            scoring: ScoringWeights::default(),
            priority: PriorityWeights::default(),
            packing: PackingConfig::default(),
            strategy: StrategyConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
