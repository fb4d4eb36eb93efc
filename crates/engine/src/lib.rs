//! # ctxkit Engine
//!
//! Turns an unbounded conversation into a bounded message set for a
//! target model:
//!
//! - [`relevance`]: six-factor lexical relevance scoring
//! - [`graph`]: dependency edges, clusters and topological ordering
//! - [`selector`]: query-driven strategy and greedy token packing
//! - [`window`]: sliding-window retention
//! - [`summarizer`]: extractive summaries
//! - [`compressor`]: leveled lexical compression
//! - [`manager`]: the orchestrating pipeline with result caching
//!
//! All keyword tables and regex families live in [`classify`].

pub mod classify;
pub mod compressor;
pub mod graph;
pub mod manager;
pub mod relevance;
pub mod selector;
pub mod summarizer;
pub mod window;

pub use classify::{QueryKind, QueryProfile, classify_query};
pub use compressor::{CompressionResult, Compressor, compress_text};
pub use graph::{
    Dependency, DependencyGraph, DependencyGraphBuilder, DependencyKind, DependencyOrder,
    MessageCluster,
};
pub use manager::{
    ContextFlags, ContextManager, ContextStats, PROCESSED_CONTEXT_CACHE, ProcessedContext,
    ProcessingOptions,
};
pub use relevance::{RelevanceFactors, RelevanceResult, RelevanceScore, RelevanceScorer};
pub use selector::{Selection, SelectionStats, SelectionStrategy, SmartSelector, derive_strategy};
pub use summarizer::{SummaryResult, Summarizer};
pub use window::{SlidingWindow, WindowResult};
