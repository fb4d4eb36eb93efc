//! Context assembly orchestration.
//!
//! [`ContextManager`] runs summarization, sliding window and compression
//! in the configured order and memoizes the result in a named cache.
//! A failing step is logged and skipped; only token counting of the
//! input and final message lists can fail a request.

use crate::compressor::{CompressionResult, Compressor};
use crate::relevance::{RelevanceResult, RelevanceScorer};
use crate::selector::{Selection, SmartSelector};
use crate::summarizer::{SummaryResult, Summarizer};
use crate::window::{SlidingWindow, WindowResult};
use ctxkit_cache::{CacheRegistry, CacheStats, TokenBudgetCache};
use ctxkit_config::{AppConfig, PipelineOrder};
use ctxkit_core::error::Result;
use ctxkit_core::message::Message;
use ctxkit_core::model::ModelCatalog;
use ctxkit_core::token::TokenCounter;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Registry name of the processed-context cache.
pub const PROCESSED_CONTEXT_CACHE: &str = "processed_context";

const FINGERPRINT_CHARS: usize = 100;
const CACHE_KEY_HEX_LEN: usize = 32;

pub const STEP_SUMMARIZE: &str = "summarize";
pub const STEP_SLIDING_WINDOW: &str = "sliding_window";
pub const STEP_COMPRESS: &str = "compress";

/// Per-request switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingOptions {
    /// Skip every optimization step.
    pub full_context: bool,
    pub disable_summary: bool,
    pub disable_window: bool,
    pub disable_compression: bool,
    /// Ignore a cached result and recompute.
    pub force_refresh: bool,
}

/// Final pipeline output; this is what the cache stores.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedContext {
    pub messages: Vec<Message>,
    pub original_count: usize,
    pub final_count: usize,
    pub original_tokens: usize,
    pub final_tokens: usize,
    /// final_tokens / original_tokens.
    pub compression_ratio: f64,
    pub summary: Option<SummaryResult>,
    pub window: Option<WindowResult>,
    pub compression: Option<CompressionResult>,
    pub cache_key: String,
    /// Step names in the order they ran.
    pub applied_steps: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextFlags {
    pub auto_summarize: bool,
    pub sliding_window: bool,
    pub compression_level: u8,
    pub cache_enabled: bool,
}

/// Read-only diagnostics for a conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ContextStats {
    pub model: String,
    pub message_count: usize,
    pub total_tokens: usize,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub context_window: usize,
    pub summarize_threshold: usize,
    /// total_tokens / context_window.
    pub utilization: f64,
    pub needs_summary: bool,
    pub flags: ContextFlags,
    pub cache: Option<CacheStats>,
}

pub struct ContextManager {
    config: AppConfig,
    counter: Arc<dyn TokenCounter>,
    catalog: Arc<ModelCatalog>,
    cache: Option<Arc<TokenBudgetCache<ProcessedContext>>>,
    scorer: RelevanceScorer,
    selector: SmartSelector,
    summarizer: Summarizer,
    window: SlidingWindow,
    compressor: Compressor,
}

impl ContextManager {
    /// Build a manager. With caching enabled the processed-context cache
    /// is fetched from (or created in) `registry`.
    pub fn new(
        config: AppConfig,
        counter: Arc<dyn TokenCounter>,
        registry: &CacheRegistry<ProcessedContext>,
    ) -> Self {
        let catalog = Arc::new(config.model_catalog());
        let cache = config.cache.enabled.then(|| {
            registry.get_or_create(PROCESSED_CONTEXT_CACHE, config.cache.capacity, config.cache.ttl())
        });

        Self {
            scorer: RelevanceScorer::new(config.scoring.clone()),
            selector: SmartSelector::new(Arc::clone(&counter), Arc::clone(&catalog), &config),
            summarizer: Summarizer::new(Arc::clone(&counter), Arc::clone(&catalog), &config.context),
            window: SlidingWindow::new(Arc::clone(&counter), Arc::clone(&catalog), &config.context),
            compressor: Compressor::new(Arc::clone(&counter)),
            config,
            counter,
            catalog,
            cache,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn process_conversation(&self, messages: &[Message], model: &str) -> Result<ProcessedContext> {
        self.process_conversation_with_options(messages, model, &ProcessingOptions::default())
    }

    pub fn process_conversation_with_options(
        &self,
        messages: &[Message],
        model: &str,
        options: &ProcessingOptions,
    ) -> Result<ProcessedContext> {
        let cache_key = cache_key(messages, model, options);

        if let Some(cache) = &self.cache
            && !options.force_refresh
            && let Some(hit) = cache.get(&cache_key)
        {
            debug!(model, key = %cache_key, "Processed context cache hit");
            return Ok(hit);
        }

        let original_tokens = self.counter.count_conversation_tokens(messages, model)?.total;
        let mut run = PipelineRun::new(messages.to_vec());

        if options.full_context {
            debug!(model, "Full context requested, skipping optimization");
        } else {
            let steps: [&str; 3] = match self.config.context.pipeline_order {
                PipelineOrder::SummarizeFirst => [STEP_SUMMARIZE, STEP_SLIDING_WINDOW, STEP_COMPRESS],
                PipelineOrder::WindowFirst => [STEP_SLIDING_WINDOW, STEP_SUMMARIZE, STEP_COMPRESS],
            };
            for step in steps {
                match step {
                    STEP_SUMMARIZE => self.summarize_step(&mut run, model, options),
                    STEP_SLIDING_WINDOW => self.window_step(&mut run, model, options),
                    _ => self.compress_step(&mut run, model, options),
                }
            }
        }

        let final_tokens = self.counter.count_conversation_tokens(&run.messages, model)?.total;
        let result = ProcessedContext {
            original_count: messages.len(),
            final_count: run.messages.len(),
            messages: run.messages,
            original_tokens,
            final_tokens,
            compression_ratio: if original_tokens == 0 {
                1.0
            } else {
                final_tokens as f64 / original_tokens as f64
            },
            summary: run.summary,
            window: run.window,
            compression: run.compression,
            cache_key,
            applied_steps: run.applied,
        };

        info!(
            model,
            original = result.original_count,
            final_count = result.final_count,
            original_tokens,
            final_tokens,
            steps = ?result.applied_steps,
            "Processed conversation"
        );

        if let Some(cache) = &self.cache {
            cache.set(&result.cache_key, result.clone(), result.final_count);
        }
        Ok(result)
    }

    fn summarize_step(&self, run: &mut PipelineRun, model: &str, options: &ProcessingOptions) {
        if options.disable_summary || !self.config.context.auto_summarize {
            return;
        }
        match self.summarizer.should_summarize(&run.messages, model) {
            Ok(true) => match self.summarizer.summarize_conversation(&run.messages, model) {
                Ok(summary) => {
                    run.messages = summary.assembled();
                    run.applied.push(STEP_SUMMARIZE.to_string());
                    run.summary = Some(summary);
                }
                Err(e) => warn!(model, error = %e, "Summarization skipped"),
            },
            Ok(false) => debug!(model, "Summarization not needed"),
            Err(e) => warn!(model, error = %e, "Summarization check failed"),
        }
    }

    fn window_step(&self, run: &mut PipelineRun, model: &str, options: &ProcessingOptions) {
        if options.disable_window || !self.config.context.sliding_window {
            return;
        }
        match self.window.apply_window(&run.messages, model) {
            Ok(window) => {
                if window.applied {
                    run.messages = window.messages.clone();
                    run.applied.push(STEP_SLIDING_WINDOW.to_string());
                }
                run.window = Some(window);
            }
            Err(e) => warn!(model, error = %e, "Sliding window skipped"),
        }
    }

    fn compress_step(&self, run: &mut PipelineRun, model: &str, options: &ProcessingOptions) {
        let level = self.config.context.compression_level;
        if options.disable_compression || level == 0 {
            return;
        }
        match self.compressor.compress_messages(&run.messages, model, level) {
            Ok(compression) => {
                run.messages = compression.messages.clone();
                run.applied.push(STEP_COMPRESS.to_string());
                run.compression = Some(compression);
            }
            Err(e) => warn!(model, level, error = %e, "Compression skipped"),
        }
    }

    /// Score every message against `query` at the configured threshold.
    pub fn score_message_relevance(&self, messages: &[Message], query: &str) -> RelevanceResult {
        self.scorer
            .score_relevance(messages, query, self.config.context.relevance_threshold)
    }

    pub fn filter_messages_by_relevance(
        &self,
        messages: &[Message],
        query: &str,
        max_messages: usize,
    ) -> (Vec<Message>, RelevanceResult) {
        self.scorer.filter_by_relevance(
            messages,
            query,
            self.config.context.relevance_threshold,
            max_messages,
        )
    }

    /// Query-aware selection with a strategy derived from the query.
    pub fn select_context(&self, messages: &[Message], query: &str, model: &str) -> Result<Selection> {
        Ok(self.selector.select_smart_context(messages, query, model)?)
    }

    pub fn context_stats(&self, messages: &[Message], model: &str) -> Result<ContextStats> {
        let usage = self.counter.count_conversation_tokens(messages, model)?;
        let spec = self.catalog.resolve(model);
        let context = &self.config.context;

        Ok(ContextStats {
            model: spec.id.clone(),
            message_count: messages.len(),
            total_tokens: usage.total,
            input_tokens: usage.input,
            output_tokens: usage.output,
            context_window: spec.context_window,
            summarize_threshold: spec.summarize_threshold,
            utilization: if spec.context_window == 0 {
                0.0
            } else {
                usage.total as f64 / spec.context_window as f64
            },
            needs_summary: context.auto_summarize && usage.total > spec.summarize_threshold,
            flags: ContextFlags {
                auto_summarize: context.auto_summarize,
                sliding_window: context.sliding_window,
                compression_level: context.compression_level,
                cache_enabled: self.cache.is_some(),
            },
            cache: self.cache_stats(),
        })
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|cache| cache.stats())
    }

    /// Drop every cached result. A no-op when caching is disabled.
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
            debug!("Cleared processed context cache");
        }
    }
}

/// Working state threaded through the pipeline steps.
struct PipelineRun {
    messages: Vec<Message>,
    applied: Vec<String>,
    summary: Option<SummaryResult>,
    window: Option<WindowResult>,
    compression: Option<CompressionResult>,
}

impl PipelineRun {
    fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            applied: Vec::new(),
            summary: None,
            window: None,
            compression: None,
        }
    }
}

/// Deterministic key over the model, the option flags and a per-message
/// fingerprint of role, timestamp and the first 100 characters.
pub fn cache_key(messages: &[Message], model: &str, options: &ProcessingOptions) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([
        b'|',
        u8::from(options.full_context),
        u8::from(options.disable_summary),
        u8::from(options.disable_window),
        u8::from(options.disable_compression),
        b'\n',
    ]);
    for message in messages {
        let prefix: String = message.content.chars().take(FINGERPRINT_CHARS).collect();
        hasher.update(format!("{}|{}|{}\n", message.role, message.timestamp, prefix).as_bytes());
    }
    let mut key = format!("{:x}", hasher.finalize());
    key.truncate(CACHE_KEY_HEX_LEN);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxkit_config::ModelOverride;
    use ctxkit_core::error::TokenError;
    use ctxkit_core::message::Role;

    struct Flat(usize);

    impl TokenCounter for Flat {
        fn count_message_tokens(&self, _: &Message, _: &str) -> std::result::Result<usize, TokenError> {
            Ok(self.0)
        }
    }

    /// Fails for any message containing "boom".
    struct Fussy;

    impl TokenCounter for Fussy {
        fn count_message_tokens(&self, m: &Message, model: &str) -> std::result::Result<usize, TokenError> {
            if m.content.contains("boom") {
                return Err(TokenError::CountFailed {
                    model: model.to_string(),
                    reason: "unsupported content".into(),
                });
            }
            Ok(10)
        }
    }

    fn config_with_model(window: usize, threshold: usize) -> AppConfig {
        let mut config = AppConfig::default();
        config.models.insert(
            "test".into(),
            ModelOverride {
                context_window: Some(window),
                summarize_threshold: Some(threshold),
            },
        );
        config
    }

    fn conversation(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                Message::new(role, format!("message number {i}")).at(1_000 + i as i64)
            })
            .collect()
    }

    fn manager(config: AppConfig, counter: Arc<dyn TokenCounter>) -> ContextManager {
        ContextManager::new(config, counter, &CacheRegistry::new())
    }

    #[test]
    fn cache_key_is_deterministic_and_option_sensitive() {
        let messages = conversation(3);
        let a = cache_key(&messages, "m", &ProcessingOptions::default());
        let b = cache_key(&messages, "m", &ProcessingOptions::default());
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);

        let full = ProcessingOptions {
            full_context: true,
            ..Default::default()
        };
        assert_ne!(a, cache_key(&messages, "m", &full));
        assert_ne!(a, cache_key(&messages, "other", &ProcessingOptions::default()));
        assert_ne!(a, cache_key(&messages[..2], "m", &ProcessingOptions::default()));

        // force_refresh does not change the key
        let refresh = ProcessingOptions {
            force_refresh: true,
            ..Default::default()
        };
        assert_eq!(a, cache_key(&messages, "m", &refresh));
    }

    #[test]
    fn small_conversation_passes_through() {
        let m = manager(config_with_model(10_000, 8_000), Arc::new(Flat(10)));
        let messages = conversation(4);
        let result = m.process_conversation(&messages, "test").unwrap();
        assert_eq!(result.messages, messages);
        assert!(result.applied_steps.is_empty());
        assert_eq!(result.compression_ratio, 1.0);
    }

    #[test]
    fn summarize_then_window_runs_in_order() {
        let mut config = config_with_model(200, 150);
        config.context.window_overlap_tokens = 0;
        let m = manager(config, Arc::new(Flat(10)));
        let result = m.process_conversation(&conversation(40), "test").unwrap();
        assert_eq!(result.applied_steps, vec![STEP_SUMMARIZE]);
        assert!(result.summary.is_some());
        assert!(result.messages.iter().any(Message::is_summary));
        assert!(result.final_tokens <= 200);
    }

    #[test]
    fn window_applies_when_summary_disabled() {
        let m = manager(config_with_model(200, 150), Arc::new(Flat(10)));
        let options = ProcessingOptions {
            disable_summary: true,
            ..Default::default()
        };
        let result = m
            .process_conversation_with_options(&conversation(40), "test", &options)
            .unwrap();
        assert_eq!(result.applied_steps, vec![STEP_SLIDING_WINDOW]);
        assert!(result.final_tokens <= 200);
        assert!(result.window.as_ref().is_some_and(|w| w.applied));
    }

    #[test]
    fn full_context_skips_every_step() {
        let m = manager(config_with_model(200, 150), Arc::new(Flat(10)));
        let options = ProcessingOptions {
            full_context: true,
            ..Default::default()
        };
        let result = m
            .process_conversation_with_options(&conversation(40), "test", &options)
            .unwrap();
        assert!(result.applied_steps.is_empty());
        assert_eq!(result.final_count, 40);
    }

    #[test]
    fn compression_runs_when_level_set() {
        let mut config = config_with_model(10_000, 8_000);
        config.context.compression_level = 1;
        let m = manager(config, Arc::new(Flat(10)));
        let messages = vec![Message::user("too    many    spaces").at(1)];
        let result = m.process_conversation(&messages, "test").unwrap();
        assert_eq!(result.applied_steps, vec![STEP_COMPRESS]);
        assert_eq!(result.messages[0].content, "too many spaces");
    }

    #[test]
    fn second_call_hits_cache() {
        let m = manager(config_with_model(10_000, 8_000), Arc::new(Flat(10)));
        let messages = conversation(6);
        let first = m.process_conversation(&messages, "test").unwrap();
        let second = m.process_conversation(&messages, "test").unwrap();
        assert_eq!(first.cache_key, second.cache_key);
        let stats = m.cache_stats().unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);

        let refresh = ProcessingOptions {
            force_refresh: true,
            ..Default::default()
        };
        m.process_conversation_with_options(&messages, "test", &refresh).unwrap();
        assert_eq!(m.cache_stats().unwrap().hits, 1);
    }

    #[test]
    fn disabled_cache_skips_memoization() {
        let mut config = config_with_model(10_000, 8_000);
        config.cache.enabled = false;
        let m = manager(config, Arc::new(Flat(10)));
        m.process_conversation(&conversation(2), "test").unwrap();
        assert!(m.cache_stats().is_none());
        // Idempotent no-op
        m.clear_cache();
        m.clear_cache();
    }

    #[test]
    fn clear_cache_empties_store() {
        let m = manager(config_with_model(10_000, 8_000), Arc::new(Flat(10)));
        m.process_conversation(&conversation(2), "test").unwrap();
        assert_eq!(m.cache_stats().unwrap().size, 1);
        m.clear_cache();
        m.clear_cache();
        assert_eq!(m.cache_stats().unwrap().size, 0);
    }

    #[test]
    fn failed_summary_is_skipped_and_later_steps_run() {
        // Over the threshold, but only one summarizable message
        let mut config = config_with_model(1_000, 50);
        config.context.compression_level = 1;
        let m = manager(config, Arc::new(Flat(100)));
        let messages = vec![
            Message::system("You are terse.").at(1),
            Message::user("tidy   this    up").at(2),
        ];

        let result = m.process_conversation(&messages, "test").unwrap();

        assert!(result.summary.is_none());
        assert!(result.window.as_ref().is_some_and(|w| !w.applied));
        assert_eq!(result.applied_steps, vec![STEP_COMPRESS]);
        assert_eq!(result.final_count, 2);
        assert_eq!(result.messages[1].content, "tidy this up");
    }

    #[test]
    fn failed_summary_still_windows() {
        let m = manager(config_with_model(400, 50), Arc::new(Flat(500)));
        let messages = vec![Message::user("one very long message").at(1)];

        let result = m.process_conversation(&messages, "test").unwrap();

        assert!(result.summary.is_none());
        assert_eq!(result.applied_steps, vec![STEP_SLIDING_WINDOW]);
        assert!(result.window.as_ref().is_some_and(|w| w.tokens_retained <= 400));
    }

    #[test]
    fn token_failure_is_fatal() {
        let m = manager(config_with_model(10_000, 8_000), Arc::new(Fussy));
        let messages = vec![Message::user("boom").at(1)];
        assert!(matches!(
            m.process_conversation(&messages, "test"),
            Err(ctxkit_core::Error::Token(_))
        ));
    }

    #[test]
    fn context_stats_report_usage() {
        let m = manager(config_with_model(100, 50), Arc::new(Flat(10)));
        let stats = m.context_stats(&conversation(6), "test").unwrap();
        assert_eq!(stats.total_tokens, 60);
        assert_eq!(stats.input_tokens, 30);
        assert_eq!(stats.output_tokens, 30);
        assert!((stats.utilization - 0.6).abs() < 1e-9);
        assert!(stats.needs_summary);
        assert!(stats.flags.cache_enabled);
        assert!(stats.cache.is_some());
    }

    #[test]
    fn relevance_helpers_use_configured_threshold() {
        let m = manager(AppConfig::default(), Arc::new(Flat(10)));
        let messages = vec![
            Message::user("How do I tune the cache capacity?"),
            Message::assistant("Set capacity in the cache section."),
        ];
        let result = m.score_message_relevance(&messages, "cache capacity");
        assert_eq!(result.threshold, 0.3);
        assert_eq!(result.original_count, 2);

        let (kept, _) = m.filter_messages_by_relevance(&messages, "cache capacity", 1);
        assert_eq!(kept.len(), 1);
    }
}
