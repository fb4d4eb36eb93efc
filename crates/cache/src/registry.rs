//! Named cache registry.
//!
//! Holds its own lock, independent of each cache's lock, so lookups of
//! one cache never serialize behind operations on another. Callers own
//! the registry; an application keeps one instance at its composition
//! root and hands it to whatever needs caching.

use crate::store::{CacheStats, TokenBudgetCache};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::debug;

/// Maps cache names to independent [`TokenBudgetCache`] instances.
pub struct CacheRegistry<V> {
    caches: RwLock<HashMap<String, Arc<TokenBudgetCache<V>>>>,
}

impl<V: Clone> CacheRegistry<V> {
    pub fn new() -> Self {
        Self {
            caches: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch a cache by name, creating it with the given capacity and TTL
    /// if it does not exist yet. An existing cache keeps its original
    /// settings.
    pub fn get_or_create(
        &self,
        name: &str,
        max_size: usize,
        ttl: Option<Duration>,
    ) -> Arc<TokenBudgetCache<V>> {
        if let Some(cache) = self.get(name) {
            return cache;
        }

        let mut caches = self.caches.write().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have created it between the two locks
        Arc::clone(caches.entry(name.to_string()).or_insert_with(|| {
            debug!(cache = name, max_size, "Created named cache");
            Arc::new(TokenBudgetCache::new(max_size, ttl))
        }))
    }

    /// Register a pre-built cache (e.g. one with an eviction callback),
    /// replacing any cache of the same name.
    pub fn register(&self, name: &str, cache: TokenBudgetCache<V>) -> Arc<TokenBudgetCache<V>> {
        let cache = Arc::new(cache);
        self.caches
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Arc::clone(&cache));
        cache
    }

    pub fn get(&self, name: &str) -> Option<Arc<TokenBudgetCache<V>>> {
        self.caches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Drop a named cache from the registry. Holders of its `Arc` keep a
    /// working, now-unregistered cache.
    pub fn remove(&self, name: &str) -> bool {
        self.caches
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    /// Registered cache names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .caches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Stats for every registered cache.
    pub fn all_stats(&self) -> HashMap<String, CacheStats> {
        self.snapshot()
            .into_iter()
            .map(|(name, cache)| (name, cache.stats()))
            .collect()
    }

    /// Run expiry cleanup on every cache. Returns the total removed.
    pub fn cleanup_all_expired(&self) -> usize {
        self.snapshot()
            .into_iter()
            .map(|(_, cache)| cache.cleanup_expired())
            .sum()
    }

    /// Clear every registered cache.
    pub fn clear_all(&self) {
        for (_, cache) in self.snapshot() {
            cache.clear();
        }
    }

    // Release the registry lock before touching individual caches.
    fn snapshot(&self) -> Vec<(String, Arc<TokenBudgetCache<V>>)> {
        self.caches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, cache)| (name.clone(), Arc::clone(cache)))
            .collect()
    }
}

impl<V: Clone> Default for CacheRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn get_or_create_returns_same_instance() {
        let registry: CacheRegistry<String> = CacheRegistry::new();
        let a = registry.get_or_create("results", 10, None);
        let b = registry.get_or_create("results", 99, None);
        assert!(Arc::ptr_eq(&a, &b));
        // First creation wins
        assert_eq!(b.max_size(), 10);
    }

    #[test]
    fn named_caches_are_independent() {
        let registry: CacheRegistry<u32> = CacheRegistry::new();
        registry.get_or_create("a", 4, None).set("k", 1, 1);
        registry.get_or_create("b", 4, None).set("k", 2, 1);

        assert_eq!(registry.get("a").unwrap().get("k"), Some(1));
        assert_eq!(registry.get("b").unwrap().get("k"), Some(2));
        assert_eq!(registry.names(), vec!["a", "b"]);
    }

    #[test]
    fn aggregate_stats_cover_all_caches() {
        let registry: CacheRegistry<u32> = CacheRegistry::new();
        let a = registry.get_or_create("a", 4, None);
        let b = registry.get_or_create("b", 4, None);
        a.set("x", 1, 1);
        a.get("x");
        b.get("missing");

        let stats = registry.all_stats();
        assert_eq!(stats["a"].hits, 1);
        assert_eq!(stats["b"].misses, 1);
    }

    #[test]
    fn cleanup_all_expired_sums_across_caches() {
        let registry: CacheRegistry<u32> = CacheRegistry::new();
        let short = Some(Duration::from_millis(5));
        registry.get_or_create("a", 4, short).set("x", 1, 1);
        registry.get_or_create("b", 4, short).set("y", 2, 1);
        registry.get_or_create("c", 4, None).set("z", 3, 1);
        thread::sleep(Duration::from_millis(25));

        assert_eq!(registry.cleanup_all_expired(), 2);
        assert_eq!(registry.get("c").unwrap().len(), 1);
    }

    #[test]
    fn remove_and_clear_all() {
        let registry: CacheRegistry<u32> = CacheRegistry::new();
        registry.get_or_create("a", 4, None).set("x", 1, 1);
        registry.get_or_create("b", 4, None).set("y", 1, 1);

        registry.clear_all();
        assert!(registry.get("a").unwrap().is_empty());

        assert!(registry.remove("a"));
        assert!(!registry.remove("a"));
        assert!(registry.get("a").is_none());
    }

    #[test]
    fn concurrent_creation_yields_one_cache() {
        let registry: Arc<CacheRegistry<u32>> = Arc::new(CacheRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.get_or_create("shared", 8, None))
            })
            .collect();
        let caches: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(caches.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
