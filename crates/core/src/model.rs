//! Built-in context limits for common LLM models.
//!
//! Each model has a context window and a summarize threshold (the total
//! token count above which auto-summarization kicks in). Overrides from
//! configuration are layered on at runtime.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Window used for model ids the catalog does not know.
pub const FALLBACK_CONTEXT_WINDOW: usize = 8_192;

/// Context limits for one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: String,
    /// Maximum tokens the model accepts.
    pub context_window: usize,
    /// Total tokens above which the conversation should be summarized.
    pub summarize_threshold: usize,
}

impl ModelSpec {
    /// Spec with the summarize threshold at 80% of the window.
    pub fn new(id: impl Into<String>, context_window: usize) -> Self {
        Self {
            id: id.into(),
            context_window,
            summarize_threshold: context_window * 4 / 5,
        }
    }

    pub fn with_threshold(mut self, summarize_threshold: usize) -> Self {
        self.summarize_threshold = summarize_threshold;
        self
    }
}

/// Thread-safe model table with built-in defaults and custom overrides.
pub struct ModelCatalog {
    models: RwLock<HashMap<String, ModelSpec>>,
}

impl ModelCatalog {
    /// Create a catalog with built-in model limits.
    pub fn with_defaults() -> Self {
        let catalog = Self::empty();

        // ── Anthropic ──────────────────────────────────────────────
        catalog.insert(ModelSpec::new("anthropic/claude-sonnet-4", 200_000));
        catalog.insert(ModelSpec::new("anthropic/claude-opus-4", 200_000));
        catalog.insert(ModelSpec::new("anthropic/claude-3.5-sonnet", 200_000));
        catalog.insert(ModelSpec::new("anthropic/claude-3.5-haiku", 200_000));

        // ── OpenAI ─────────────────────────────────────────────────
        catalog.insert(ModelSpec::new("openai/gpt-4o", 128_000));
        catalog.insert(ModelSpec::new("openai/gpt-4o-mini", 128_000));
        catalog.insert(ModelSpec::new("openai/gpt-4-turbo", 128_000));
        catalog.insert(ModelSpec::new("openai/gpt-4", 8_192));
        catalog.insert(ModelSpec::new("openai/gpt-3.5-turbo", 16_385));
        catalog.insert(ModelSpec::new("openai/o3-mini", 200_000));

        // ── Google ─────────────────────────────────────────────────
        catalog.insert(ModelSpec::new("google/gemini-2.0-flash", 1_048_576));
        catalog.insert(ModelSpec::new("google/gemini-1.5-pro", 2_097_152));

        // ── Open weights ───────────────────────────────────────────
        catalog.insert(ModelSpec::new("meta-llama/llama-3.1-70b", 131_072));
        catalog.insert(ModelSpec::new("mistral/codestral", 32_768));
        catalog.insert(ModelSpec::new("deepseek/deepseek-v3", 65_536));

        catalog
    }

    /// Create an empty catalog. Every lookup resolves to the fallback.
    pub fn empty() -> Self {
        Self {
            models: RwLock::new(HashMap::new()),
        }
    }

    /// Add or replace a model spec.
    pub fn insert(&self, spec: ModelSpec) {
        self.models
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(spec.id.clone(), spec);
    }

    /// Layer configuration overrides on top of the existing (or fallback) spec.
    pub fn apply_override(
        &self,
        model: &str,
        context_window: Option<usize>,
        summarize_threshold: Option<usize>,
    ) {
        let mut spec = self.resolve(model);
        if let Some(window) = context_window {
            spec.context_window = window;
            spec.summarize_threshold = window * 4 / 5;
        }
        if let Some(threshold) = summarize_threshold {
            spec.summarize_threshold = threshold;
        }
        self.insert(spec);
    }

    /// Look up a model, if known.
    pub fn get(&self, model: &str) -> Option<ModelSpec> {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(model)
            .cloned()
    }

    /// Look up a model, falling back to a conservative default for unknown ids.
    pub fn resolve(&self, model: &str) -> ModelSpec {
        self.get(model).unwrap_or_else(|| {
            tracing::debug!(model, "Unknown model, using fallback context window");
            ModelSpec::new(model, FALLBACK_CONTEXT_WINDOW)
        })
    }

    /// Number of known models.
    pub fn len(&self) -> usize {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_resolves() {
        let catalog = ModelCatalog::with_defaults();
        let spec = catalog.resolve("openai/gpt-4o");
        assert_eq!(spec.context_window, 128_000);
        assert_eq!(spec.summarize_threshold, 102_400);
    }

    #[test]
    fn unknown_model_falls_back() {
        let catalog = ModelCatalog::empty();
        let spec = catalog.resolve("local/mystery");
        assert_eq!(spec.id, "local/mystery");
        assert_eq!(spec.context_window, FALLBACK_CONTEXT_WINDOW);
        assert!(catalog.get("local/mystery").is_none());
    }

    #[test]
    fn override_replaces_window_and_threshold() {
        let catalog = ModelCatalog::with_defaults();
        catalog.apply_override("openai/gpt-4o", Some(2_000), None);
        let spec = catalog.resolve("openai/gpt-4o");
        assert_eq!(spec.context_window, 2_000);
        assert_eq!(spec.summarize_threshold, 1_600);

        catalog.apply_override("openai/gpt-4o", None, Some(1_000));
        assert_eq!(catalog.resolve("openai/gpt-4o").summarize_threshold, 1_000);
    }

    #[test]
    fn override_registers_unknown_model() {
        let catalog = ModelCatalog::empty();
        catalog.apply_override("test/tiny", Some(512), Some(400));
        let spec = catalog.get("test/tiny").unwrap();
        assert_eq!(spec.context_window, 512);
        assert_eq!(spec.summarize_threshold, 400);
        assert_eq!(catalog.len(), 1);
    }
}
