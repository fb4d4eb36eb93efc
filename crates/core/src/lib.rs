//! # ctxkit Core
//!
//! Domain types, traits, and error definitions for the ctxkit context
//! assembly engine. Everything here is framework-free: the engine, cache
//! and CLI crates all depend inward on this crate.
//!
//! ## Contents
//!
//! - [`message`]: role-tagged conversation messages with typed metadata
//! - [`token`]: the token counter seam and a heuristic default
//! - [`model`]: per-model context window and summarize threshold catalog
//! - [`error`]: the error taxonomy shared by every crate

pub mod error;
pub mod message;
pub mod model;
pub mod token;

// Re-export key types at crate root for ergonomics
pub use error::{CompressionError, Error, Result, SummaryError, TokenError};
pub use message::{Message, MessageMeta, Role};
pub use model::{ModelCatalog, ModelSpec};
pub use token::{HeuristicTokenCounter, TokenCounter, TokenUsage};
