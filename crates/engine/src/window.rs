//! Sliding-window retention.
//!
//! System messages and the most recent summary always survive. The rest
//! of the budget goes to a contiguous run of the newest messages, plus a
//! small overlap of the messages just before that run.

use ctxkit_config::ContextConfig;
use ctxkit_core::error::TokenError;
use ctxkit_core::message::{Message, Role};
use ctxkit_core::model::ModelCatalog;
use ctxkit_core::token::TokenCounter;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize)]
pub struct WindowResult {
    /// Preserved messages first, then the windowed run.
    pub messages: Vec<Message>,
    pub original_count: usize,
    pub final_count: usize,
    pub tokens_removed: usize,
    pub tokens_retained: usize,
    /// Tokens spent on overlap messages before the recent run.
    pub overlap_tokens: usize,
    pub context_window: usize,
    /// False when the input already fit or windowing is disabled.
    pub applied: bool,
}

pub struct SlidingWindow {
    counter: Arc<dyn TokenCounter>,
    catalog: Arc<ModelCatalog>,
    enabled: bool,
    overlap_tokens: usize,
}

impl SlidingWindow {
    pub fn new(counter: Arc<dyn TokenCounter>, catalog: Arc<ModelCatalog>, config: &ContextConfig) -> Self {
        Self {
            counter,
            catalog,
            enabled: config.sliding_window,
            overlap_tokens: config.window_overlap_tokens,
        }
    }

    pub fn apply_window(&self, messages: &[Message], model: &str) -> Result<WindowResult, TokenError> {
        let context_window = self.catalog.resolve(model).context_window;
        let tokens = messages
            .iter()
            .map(|m| self.counter.count_message_tokens(m, model))
            .collect::<Result<Vec<_>, _>>()?;
        let total: usize = tokens.iter().sum();

        if !self.enabled || total <= context_window {
            debug!(model, total, context_window, "Sliding window not needed");
            return Ok(WindowResult {
                messages: messages.to_vec(),
                original_count: messages.len(),
                final_count: messages.len(),
                tokens_removed: 0,
                tokens_retained: total,
                overlap_tokens: 0,
                context_window,
                applied: false,
            });
        }

        let last_summary = messages.iter().rposition(Message::is_summary);
        let is_preserved =
            |i: usize| messages[i].role == Role::System || Some(i) == last_summary;

        let preserved: Vec<usize> = (0..messages.len()).filter(|&i| is_preserved(i)).collect();
        let preserved_tokens: usize = preserved.iter().map(|&i| tokens[i]).sum();
        if preserved_tokens > context_window {
            warn!(
                model,
                preserved_tokens, context_window, "Preserved messages alone exceed the context window"
            );
        }

        // Everything up to the summary has already been folded into it.
        let start = last_summary.map_or(0, |s| s + 1);
        let candidates: Vec<usize> = (start..messages.len()).filter(|&i| !is_preserved(i)).collect();

        let remaining = context_window.saturating_sub(preserved_tokens);
        let reserve = self.overlap_tokens.min(remaining / 2);
        let recent_budget = remaining - reserve;

        // Contiguous run backward from the newest message.
        let mut recent_used = 0;
        let mut cut = candidates.len();
        while cut > 0 {
            let t = tokens[candidates[cut - 1]];
            if recent_used + t > recent_budget {
                break;
            }
            recent_used += t;
            cut -= 1;
        }

        let mut overlap_used = 0;
        if cut > 0 && self.overlap_tokens > 0 {
            let overlap_budget = self.overlap_tokens.min(remaining - recent_used);
            while cut > 0 {
                let t = tokens[candidates[cut - 1]];
                if overlap_used + t > overlap_budget {
                    break;
                }
                overlap_used += t;
                cut -= 1;
            }
        }

        if let Some(&newest) = candidates.last()
            && cut == candidates.len()
        {
            warn!(
                model,
                newest_tokens = tokens[newest],
                remaining,
                "Newest message alone exceeds the window budget; no recent messages kept"
            );
        }

        let kept: Vec<Message> = preserved
            .iter()
            .chain(&candidates[cut..])
            .map(|&i| messages[i].clone())
            .collect();
        let retained = preserved_tokens + recent_used + overlap_used;

        debug!(
            model,
            original = messages.len(),
            kept = kept.len(),
            retained,
            overlap = overlap_used,
            "Applied sliding window"
        );

        Ok(WindowResult {
            original_count: messages.len(),
            final_count: kept.len(),
            messages: kept,
            tokens_removed: total - retained,
            tokens_retained: retained,
            overlap_tokens: overlap_used,
            context_window,
            applied: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxkit_core::model::ModelSpec;

    /// Every message costs exactly `cost` tokens.
    struct Flat(usize);

    impl TokenCounter for Flat {
        fn count_message_tokens(&self, _: &Message, _: &str) -> Result<usize, TokenError> {
            Ok(self.0)
        }
    }

    fn window(cost: usize, context_window: usize, overlap: usize) -> SlidingWindow {
        let catalog = ModelCatalog::empty();
        catalog.insert(ModelSpec::new("test", context_window));
        let config = ContextConfig {
            window_overlap_tokens: overlap,
            ..Default::default()
        };
        SlidingWindow::new(Arc::new(Flat(cost)), Arc::new(catalog), &config)
    }

    fn conversation(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                let m = if i % 2 == 0 {
                    Message::user(format!("question {i}"))
                } else {
                    Message::assistant(format!("answer {i}"))
                };
                m.at(i as i64 + 1)
            })
            .collect()
    }

    #[test]
    fn fitting_conversation_is_untouched() {
        let messages = conversation(10);
        let result = window(50, 2000, 200).apply_window(&messages, "test").unwrap();
        assert!(!result.applied);
        assert_eq!(result.messages, messages);
        assert_eq!(result.tokens_removed, 0);
    }

    #[test]
    fn disabled_window_is_untouched() {
        let messages = conversation(50);
        let config = ContextConfig {
            sliding_window: false,
            ..Default::default()
        };
        let catalog = ModelCatalog::empty();
        catalog.insert(ModelSpec::new("test", 100));
        let w = SlidingWindow::new(Arc::new(Flat(50)), Arc::new(catalog), &config);
        let result = w.apply_window(&messages, "test").unwrap();
        assert!(!result.applied);
        assert_eq!(result.final_count, 50);
    }

    #[test]
    fn oversized_conversation_fits_window() {
        let messages = conversation(50);
        let result = window(50, 2000, 200).apply_window(&messages, "test").unwrap();
        assert!(result.applied);
        assert!(result.final_count < 50);
        assert!(result.tokens_retained <= 2000);
        assert_eq!(result.overlap_tokens, 200);
        assert_eq!(result.tokens_removed + result.tokens_retained, 2500);
        // Newest message always survives
        assert_eq!(result.messages.last(), messages.last());
    }

    #[test]
    fn system_and_latest_summary_are_preserved_first() {
        let mut messages = vec![Message::system("You are helpful").at(1)];
        messages.extend(conversation(10));
        messages.push(Message::assistant("## Conversation Summary").as_summary(10).at(20));
        messages.extend(conversation(30).into_iter().map(|m| m.at(30)));

        let result = window(10, 150, 20).apply_window(&messages, "test").unwrap();
        assert!(result.applied);
        assert_eq!(result.messages[0].role, Role::System);
        assert!(result.messages[1].is_summary());
        assert!(result.tokens_retained <= 150);
        // Nothing from before the summary besides the system prompt
        assert!(result.messages[2..].iter().all(|m| m.timestamp == 30));
    }

    #[test]
    fn oversized_newest_message_leaves_only_preserved() {
        let messages = vec![Message::system("rules").at(1), Message::user("huge paste").at(2)];
        let result = window(500, 600, 200).apply_window(&messages, "test").unwrap();
        assert!(result.applied);
        assert_eq!(result.final_count, 1);
        assert_eq!(result.messages[0].role, Role::System);
        assert_eq!(result.tokens_retained, 500);
        assert!(result.tokens_retained <= result.context_window);
    }

    #[test]
    fn zero_overlap_uses_full_budget_for_recent() {
        let messages = conversation(20);
        let result = window(10, 100, 0).apply_window(&messages, "test").unwrap();
        assert_eq!(result.final_count, 10);
        assert_eq!(result.overlap_tokens, 0);
    }
}
