//! Extractive conversation summaries.
//!
//! The summary is assembled from existing text only: leading clauses of
//! user requests, leading excerpts of assistant replies and a few fenced
//! code blocks, under fixed headings.

use ctxkit_config::ContextConfig;
use ctxkit_core::error::{Result, SummaryError, TokenError};
use ctxkit_core::message::{Message, Role};
use ctxkit_core::model::ModelCatalog;
use ctxkit_core::token::TokenCounter;
use regex::Regex;
use serde::Serialize;
use std::sync::{Arc, LazyLock};
use tracing::debug;

const MAX_USER_REQUESTS: usize = 5;
const MAX_ASSISTANT_EXCERPTS: usize = 5;
const MAX_CODE_SNIPPETS: usize = 3;
const USER_CLAUSE_CHARS: usize = 150;
const ASSISTANT_EXCERPT_CHARS: usize = 200;

static FENCED_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[^\n]*\n.*?```").expect("valid regex"));

#[derive(Debug, Clone, Serialize)]
pub struct SummaryResult {
    pub summary: String,
    pub summary_message: Message,
    /// System messages and any earlier summary, kept ahead of the new one.
    pub preserved: Vec<Message>,
    /// Recent messages kept verbatim after the new summary.
    pub kept: Vec<Message>,
    pub original_tokens: usize,
    pub summary_tokens: usize,
    /// summary_tokens / original_tokens.
    pub compression_ratio: f64,
    pub messages_summarized: usize,
    pub messages_kept: usize,
}

impl SummaryResult {
    /// The replacement conversation: preserved, summary, then recent.
    pub fn assembled(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.preserved.len() + 1 + self.kept.len());
        out.extend(self.preserved.iter().cloned());
        out.push(self.summary_message.clone());
        out.extend(self.kept.iter().cloned());
        out
    }
}

pub struct Summarizer {
    counter: Arc<dyn TokenCounter>,
    catalog: Arc<ModelCatalog>,
    auto_summarize: bool,
    recent_ratio: f64,
}

impl Summarizer {
    pub fn new(counter: Arc<dyn TokenCounter>, catalog: Arc<ModelCatalog>, config: &ContextConfig) -> Self {
        Self {
            counter,
            catalog,
            auto_summarize: config.auto_summarize,
            recent_ratio: config.summary_recent_ratio,
        }
    }

    /// True only when auto-summarize is on and the conversation exceeds
    /// the model's summarize threshold.
    pub fn should_summarize(&self, messages: &[Message], model: &str) -> std::result::Result<bool, TokenError> {
        if !self.auto_summarize {
            return Ok(false);
        }
        let total = self.counter.count_conversation_tokens(messages, model)?.total;
        Ok(total > self.catalog.resolve(model).summarize_threshold)
    }

    pub fn summarize_conversation(&self, messages: &[Message], model: &str) -> Result<SummaryResult> {
        if messages.is_empty() {
            return Err(SummaryError::EmptyConversation.into());
        }
        let spec = self.catalog.resolve(model);
        let total = self.counter.count_conversation_tokens(messages, model)?.total;
        if !self.auto_summarize || total <= spec.summarize_threshold {
            return Err(SummaryError::NotNeeded {
                tokens: total,
                threshold: spec.summarize_threshold,
            }
            .into());
        }

        let last_summary = messages.iter().rposition(Message::is_summary);
        let start = last_summary.map_or(0, |s| s + 1);

        let preserved: Vec<Message> = messages
            .iter()
            .enumerate()
            .filter(|(i, m)| m.role == Role::System || Some(*i) == last_summary)
            .map(|(_, m)| m.clone())
            .collect();
        let eligible: Vec<&Message> = messages[start..]
            .iter()
            .filter(|m| m.role != Role::System)
            .collect();
        if eligible.len() < 2 {
            return Err(SummaryError::TooFewMessages {
                eligible: eligible.len(),
            }
            .into());
        }

        let eligible_tokens = eligible
            .iter()
            .map(|m| self.counter.count_message_tokens(m, model))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        // Recent tail kept verbatim, always leaving two messages to summarize.
        let tail_budget = (spec.context_window as f64 * self.recent_ratio) as usize;
        let max_tail = eligible.len() - 2;
        let mut tail_tokens = 0;
        let mut kept_count = 0;
        while kept_count < max_tail {
            let t = eligible_tokens[eligible.len() - 1 - kept_count];
            if tail_tokens + t > tail_budget {
                break;
            }
            tail_tokens += t;
            kept_count += 1;
        }

        let split = eligible.len() - kept_count;
        let to_summarize: Vec<Message> = eligible[..split].iter().map(|m| (*m).clone()).collect();
        let kept: Vec<Message> = eligible[split..].iter().map(|m| (*m).clone()).collect();
        let original_tokens: usize = eligible_tokens[..split].iter().sum();

        let summary = build_summary(&to_summarize);
        let summary_message = create_summary_message(&summary, &to_summarize);
        let summary_tokens = self.counter.count_message_tokens(&summary_message, model)?;

        debug!(
            model,
            summarized = to_summarize.len(),
            kept = kept.len(),
            original_tokens,
            summary_tokens,
            "Summarized conversation"
        );

        Ok(SummaryResult {
            summary,
            summary_message,
            preserved,
            messages_summarized: to_summarize.len(),
            messages_kept: kept.len(),
            kept,
            original_tokens,
            summary_tokens,
            compression_ratio: if original_tokens == 0 {
                1.0
            } else {
                summary_tokens as f64 / original_tokens as f64
            },
        })
    }
}

/// Wrap summary text as an assistant message flagged as a summary,
/// stamped with the last summarized message's timestamp.
pub fn create_summary_message(summary: &str, summarized: &[Message]) -> Message {
    let timestamp = summarized.last().map_or(0, |m| m.timestamp);
    Message::assistant(summary)
        .at(timestamp)
        .as_summary(summarized.len())
}

/// Render the extractive summary for `messages`.
pub fn build_summary(messages: &[Message]) -> String {
    let user_requests = most_recent(messages, Role::User, MAX_USER_REQUESTS, |m| {
        leading_clause(&strip_code(&m.content), USER_CLAUSE_CHARS)
    });
    let assistant_excerpts = most_recent(messages, Role::Assistant, MAX_ASSISTANT_EXCERPTS, |m| {
        truncate_chars(&normalize(&strip_code(&m.content)), ASSISTANT_EXCERPT_CHARS)
    });

    let mut snippets: Vec<&str> = messages
        .iter()
        .flat_map(|m| FENCED_BLOCK_RE.find_iter(&m.content).map(|b| b.as_str()))
        .collect();
    let skip = snippets.len().saturating_sub(MAX_CODE_SNIPPETS);
    snippets.drain(..skip);

    let mut out = String::from("## Conversation Summary\n\n");
    out.push_str(&format!("Summarized {} earlier messages.\n", messages.len()));

    if !user_requests.is_empty() {
        out.push_str("\n### User Requests\n");
        for request in &user_requests {
            out.push_str(&format!("- {request}\n"));
        }
    }
    if !assistant_excerpts.is_empty() {
        out.push_str("\n### Assistant Responses\n");
        for excerpt in &assistant_excerpts {
            out.push_str(&format!("- {excerpt}\n"));
        }
    }
    if !snippets.is_empty() {
        out.push_str("\n### Code Snippets\n");
        for snippet in snippets {
            out.push('\n');
            out.push_str(snippet);
            out.push('\n');
        }
    }
    out
}

/// Up to `limit` non-empty extracts from the newest messages of `role`,
/// returned oldest first.
fn most_recent(
    messages: &[Message],
    role: Role,
    limit: usize,
    extract: impl Fn(&Message) -> String,
) -> Vec<String> {
    let mut picked: Vec<String> = messages
        .iter()
        .rev()
        .filter(|m| m.role == role && !m.is_summary())
        .map(extract)
        .filter(|s| !s.is_empty())
        .take(limit)
        .collect();
    picked.reverse();
    picked
}

fn strip_code(text: &str) -> String {
    FENCED_BLOCK_RE.replace_all(text, " ").into_owned()
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First sentence, capped at `max_chars`.
fn leading_clause(text: &str, max_chars: usize) -> String {
    let text = normalize(text);
    let mut end = text.len();
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '?' | '!') && chars.peek().is_none_or(|(_, next)| next.is_whitespace()) {
            end = i + c.len_utf8();
            break;
        }
    }
    truncate_chars(&text[..end], max_chars)
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", text[..cut].trim_end()),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxkit_core::model::ModelSpec;

    struct Flat(usize);

    impl TokenCounter for Flat {
        fn count_message_tokens(&self, _: &Message, _: &str) -> std::result::Result<usize, TokenError> {
            Ok(self.0)
        }
    }

    fn summarizer(auto: bool, window: usize, threshold: usize) -> Summarizer {
        let catalog = ModelCatalog::empty();
        catalog.insert(ModelSpec::new("test", window).with_threshold(threshold));
        let config = ContextConfig {
            auto_summarize: auto,
            ..Default::default()
        };
        Summarizer::new(Arc::new(Flat(10)), Arc::new(catalog), &config)
    }

    fn conversation(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("Please fix bug {i}. It crashes on start.")).at(i as i64)
                } else {
                    Message::assistant(format!("Fixed bug {}: the config was missing.", i - 1)).at(i as i64)
                }
            })
            .collect()
    }

    #[test]
    fn disabled_auto_summarize_never_triggers() {
        let s = summarizer(false, 100, 10);
        assert!(!s.should_summarize(&conversation(100), "test").unwrap());
    }

    #[test]
    fn triggers_only_above_threshold() {
        let s = summarizer(true, 1000, 100);
        assert!(!s.should_summarize(&conversation(10), "test").unwrap());
        assert!(s.should_summarize(&conversation(11), "test").unwrap());
    }

    #[test]
    fn empty_and_not_needed_fail() {
        let s = summarizer(true, 1000, 100);
        let err = s.summarize_conversation(&[], "test").unwrap_err();
        assert!(matches!(err, ctxkit_core::Error::Summary(SummaryError::EmptyConversation)));

        let err = s.summarize_conversation(&conversation(4), "test").unwrap_err();
        assert!(matches!(
            err,
            ctxkit_core::Error::Summary(SummaryError::NotNeeded { tokens: 40, threshold: 100 })
        ));
    }

    #[test]
    fn too_few_after_existing_summary() {
        let s = summarizer(true, 1000, 20);
        let mut messages = conversation(6);
        messages.push(Message::assistant("old summary").as_summary(6).at(7));
        messages.push(Message::user("one more").at(8));
        let err = s.summarize_conversation(&messages, "test").unwrap_err();
        assert!(matches!(
            err,
            ctxkit_core::Error::Summary(SummaryError::TooFewMessages { eligible: 1 })
        ));
    }

    #[test]
    fn summary_replaces_older_messages_and_keeps_tail() {
        // 200 * 0.25 = 50 token tail => 5 messages kept
        let s = summarizer(true, 200, 100);
        let mut messages = vec![Message::system("rules").at(0)];
        messages.extend(conversation(20));

        let result = s.summarize_conversation(&messages, "test").unwrap();
        assert_eq!(result.messages_kept, 5);
        assert_eq!(result.messages_summarized, 15);
        assert_eq!(result.preserved.len(), 1);
        assert!(result.summary_message.is_summary());
        assert_eq!(result.summary_message.role, Role::Assistant);
        assert_eq!(result.summary_message.meta.summarized_messages, Some(15));
        assert_eq!(result.summary_message.timestamp, 14);

        let assembled = result.assembled();
        assert_eq!(assembled.len(), 7);
        assert_eq!(assembled[0].role, Role::System);
        assert!(assembled[1].is_summary());
        assert_eq!(assembled.last().map(|m| m.timestamp), Some(19));
    }

    #[test]
    fn tail_never_leaves_fewer_than_two_to_summarize() {
        // Huge tail budget would keep everything
        let s = summarizer(true, 100_000, 10);
        let result = s.summarize_conversation(&conversation(4), "test").unwrap();
        assert_eq!(result.messages_summarized, 2);
        assert_eq!(result.messages_kept, 2);
    }

    #[test]
    fn summary_text_sections() {
        let messages = vec![
            Message::user("How do I parse TOML? I tried serde."),
            Message::assistant("Use the toml crate:\n```rust\nlet v: Config = toml::from_str(s)?;\n```\nThen validate."),
            Message::user("Thanks! What about env overrides?"),
        ];
        let summary = build_summary(&messages);
        assert!(summary.starts_with("## Conversation Summary"));
        assert!(summary.contains("### User Requests\n- How do I parse TOML?\n- Thanks!"));
        assert!(summary.contains("### Assistant Responses\n- Use the toml crate: Then validate."));
        assert!(summary.contains("### Code Snippets"));
        assert!(summary.contains("toml::from_str"));
    }

    #[test]
    fn limits_are_applied() {
        let messages: Vec<Message> = (0..12)
            .map(|i| Message::user(format!("request number {i}")))
            .collect();
        let summary = build_summary(&messages);
        assert_eq!(summary.matches("\n- request").count(), 5);
        assert!(summary.contains("request number 11"));
        assert!(!summary.contains("request number 6\n"));
    }

    #[test]
    fn truncation_is_char_safe() {
        let text = "é".repeat(300);
        let clause = leading_clause(&text, 150);
        assert!(clause.ends_with("..."));
        assert_eq!(clause.chars().count(), 153);
    }
}
