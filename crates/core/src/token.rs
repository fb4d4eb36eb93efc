//! Token counting seam.
//!
//! Real tokenizers live outside this crate; the engine only sees the
//! [`TokenCounter`] trait and trusts its results. [`HeuristicTokenCounter`]
//! is the default: ~4 characters per token, accurate within ~10% for BPE
//! tokenizers on English text.

use crate::error::TokenError;
use crate::message::{Message, Role};
use serde::{Deserialize, Serialize};

/// Per-message overhead for role name, delimiters and formatting markers.
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Token totals for a conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub total: usize,
    /// Tokens in prompt-side messages (user, system, tool).
    pub input: usize,
    /// Tokens in assistant messages.
    pub output: usize,
}

/// Counts tokens for a model. Implementations must be pure and
/// deterministic per model id.
pub trait TokenCounter: Send + Sync {
    fn count_message_tokens(&self, message: &Message, model: &str) -> Result<usize, TokenError>;

    fn count_conversation_tokens(
        &self,
        messages: &[Message],
        model: &str,
    ) -> Result<TokenUsage, TokenError> {
        let mut usage = TokenUsage::default();
        for message in messages {
            let tokens = self.count_message_tokens(message, model)?;
            usage.total += tokens;
            match message.role {
                Role::Assistant => usage.output += tokens,
                _ => usage.input += tokens,
            }
        }
        Ok(usage)
    }
}

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.len().div_ceil(4)
}

/// Character-heuristic counter. Ignores the model id.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenCounter;

impl TokenCounter for HeuristicTokenCounter {
    fn count_message_tokens(&self, message: &Message, _model: &str) -> Result<usize, TokenError> {
        Ok(MESSAGE_OVERHEAD_TOKENS + estimate_tokens(&message.content))
    }
}
