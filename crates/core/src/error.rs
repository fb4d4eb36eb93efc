//! Error types for the ctxkit domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all ctxkit operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Token counting ---
    #[error("Token counting error: {0}")]
    Token(#[from] TokenError),

    // --- Summarization ---
    #[error("Summarization error: {0}")]
    Summary(#[from] SummaryError),

    // --- Compression ---
    #[error("Compression error: {0}")]
    Compression(#[from] CompressionError),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum TokenError {
    #[error("Failed to count tokens for model {model}: {reason}")]
    CountFailed { model: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SummaryError {
    #[error("No messages to summarize")]
    EmptyConversation,

    #[error("Summarization not needed: {tokens} tokens is within the {threshold} token threshold")]
    NotNeeded { tokens: usize, threshold: usize },

    #[error("Not enough messages to summarize: {eligible} eligible, need at least 2")]
    TooFewMessages { eligible: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompressionError {
    #[error("Invalid compression level {0} (expected 0-5)")]
    InvalidLevel(u8),
}
