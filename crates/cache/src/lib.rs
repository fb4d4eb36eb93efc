//! In-memory result caching for ctxkit.
//!
//! [`TokenBudgetCache`] is a thread-safe LRU store with per-entry TTLs,
//! an optional eviction callback and hit/miss statistics.
//! [`CacheRegistry`] maps names to independent caches so unrelated
//! callers never contend on the same lock. Nothing here persists across
//! process restarts.

pub mod registry;
pub mod store;

pub use registry::CacheRegistry;
pub use store::{CacheStats, EvictionCallback, TokenBudgetCache};
