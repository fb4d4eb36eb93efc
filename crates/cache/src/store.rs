//! LRU + TTL key/value store.
//!
//! # Locking
//!
//! One `RwLock` per cache guards the LRU list and its index together.
//! `get` reorders the list, so it takes the write lock like every
//! mutating operation; only `stats`, `keys`, `len` and `contains` read.
//!
//! The eviction callback runs while the write lock is held. It must not
//! call back into the same cache.

use lru::LruCache;
use serde::Serialize;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::debug;

/// Invoked with `(key, value)` for every entry dropped by capacity
/// pressure, expiry or `clear`. Explicit `delete` does not notify.
pub type EvictionCallback<V> = Box<dyn Fn(&str, &V) + Send + Sync>;

/// One cached artifact.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    last_accessed: Instant,
    /// `None` never expires.
    ttl: Option<Duration>,
    size: usize,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.duration_since(self.created_at) > ttl,
            None => false,
        }
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped to stay within capacity.
    pub evictions: u64,
    /// Entries dropped because their TTL elapsed.
    pub expirations: u64,
    /// Current number of entries.
    pub size: usize,
    pub max_size: usize,
    /// Sum of the caller-supplied entry sizes.
    pub total_entry_size: usize,
    /// hits / (hits + misses), 0.0 before the first lookup.
    pub hit_rate: f64,
}

struct CacheState<V> {
    entries: LruCache<String, CacheEntry<V>>,
    stats: CacheStats,
}

impl<V> CacheState<V> {
    fn record_hit(&mut self) {
        self.stats.hits += 1;
        self.refresh_hit_rate();
    }

    fn record_miss(&mut self) {
        self.stats.misses += 1;
        self.refresh_hit_rate();
    }

    fn refresh_hit_rate(&mut self) {
        let lookups = self.stats.hits + self.stats.misses;
        self.stats.hit_rate = if lookups == 0 {
            0.0
        } else {
            self.stats.hits as f64 / lookups as f64
        };
    }
}

/// Thread-safe LRU cache with TTL expiry.
pub struct TokenBudgetCache<V> {
    state: RwLock<CacheState<V>>,
    max_size: usize,
    default_ttl: Option<Duration>,
    on_evict: Option<EvictionCallback<V>>,
}

impl<V: Clone> TokenBudgetCache<V> {
    /// Create a cache holding at most `max_size` entries (minimum 1).
    /// `default_ttl` of `None` means entries never expire.
    pub fn new(max_size: usize, default_ttl: Option<Duration>) -> Self {
        let max_size = max_size.max(1);
        Self {
            state: RwLock::new(CacheState {
                entries: LruCache::unbounded(),
                stats: CacheStats {
                    max_size,
                    ..Default::default()
                },
            }),
            max_size,
            default_ttl,
            on_evict: None,
        }
    }

    /// Attach an eviction callback.
    pub fn with_eviction_callback(mut self, callback: EvictionCallback<V>) -> Self {
        self.on_evict = Some(callback);
        self
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    /// Look up a key, promoting it to most-recently-used.
    ///
    /// An expired entry is removed and counted as both a miss and an
    /// expiration.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut state = self.write();
        let now = Instant::now();

        let Some(expired) = state.entries.peek(key).map(|entry| entry.is_expired(now)) else {
            state.record_miss();
            return None;
        };

        if expired {
            if let Some(entry) = state.entries.pop(key) {
                state.stats.total_entry_size =
                    state.stats.total_entry_size.saturating_sub(entry.size);
                self.notify(key, &entry.value);
            }
            state.stats.expirations += 1;
            state.record_miss();
            debug!(key, "Cache entry expired");
            return None;
        }

        let value = state.entries.get_mut(key).map(|entry| {
            entry.last_accessed = now;
            entry.value.clone()
        });
        state.record_hit();
        value
    }

    /// Insert or replace a value using the cache's default TTL.
    pub fn set(&self, key: impl Into<String>, value: V, size: usize) {
        self.set_with_ttl(key, value, size, self.default_ttl);
    }

    /// Insert or replace a value with an explicit TTL.
    pub fn set_with_ttl(
        &self,
        key: impl Into<String>,
        value: V,
        size: usize,
        ttl: Option<Duration>,
    ) {
        let key = key.into();
        let now = Instant::now();
        let mut state = self.write();

        if let Some(entry) = state.entries.get_mut(&key) {
            let old_size = entry.size;
            entry.value = value;
            entry.created_at = now;
            entry.last_accessed = now;
            entry.ttl = ttl;
            entry.size = size;
            state.stats.total_entry_size =
                state.stats.total_entry_size.saturating_sub(old_size) + size;
            return;
        }

        state.entries.put(
            key,
            CacheEntry {
                value,
                created_at: now,
                last_accessed: now,
                ttl,
                size,
            },
        );
        state.stats.total_entry_size += size;

        while state.entries.len() > self.max_size {
            let Some((evicted_key, entry)) = state.entries.pop_lru() else {
                break;
            };
            state.stats.total_entry_size = state.stats.total_entry_size.saturating_sub(entry.size);
            state.stats.evictions += 1;
            debug!(key = %evicted_key, "Evicted least-recently-used cache entry");
            self.notify(&evicted_key, &entry.value);
        }
        state.stats.size = state.entries.len();
    }

    /// Remove a key. Returns whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        let mut state = self.write();
        match state.entries.pop(key) {
            Some(entry) => {
                state.stats.total_entry_size =
                    state.stats.total_entry_size.saturating_sub(entry.size);
                state.stats.size = state.entries.len();
                true
            }
            None => false,
        }
    }

    /// Remove every entry, notifying the eviction callback for each.
    pub fn clear(&self) {
        let mut state = self.write();
        while let Some((key, entry)) = state.entries.pop_lru() {
            self.notify(&key, &entry.value);
        }
        state.stats.size = 0;
        state.stats.total_entry_size = 0;
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let mut state = self.write();
        let now = Instant::now();

        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            if let Some(entry) = state.entries.pop(key.as_str()) {
                state.stats.total_entry_size =
                    state.stats.total_entry_size.saturating_sub(entry.size);
                self.notify(key, &entry.value);
            }
        }

        state.stats.expirations += expired.len() as u64;
        state.stats.size = state.entries.len();
        if !expired.is_empty() {
            debug!(count = expired.len(), "Removed expired cache entries");
        }
        expired.len()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> CacheStats {
        let state = self.read();
        CacheStats {
            size: state.entries.len(),
            ..state.stats.clone()
        }
    }

    /// Keys from most- to least-recently used. Does not touch LRU order.
    pub fn keys(&self) -> Vec<String> {
        self.read().entries.iter().map(|(k, _)| k.clone()).collect()
    }

    /// Whether a key is present (expired or not). Does not touch LRU order.
    pub fn contains(&self, key: &str) -> bool {
        self.read().entries.contains(key)
    }

    /// Time since the entry was last read or written, if present.
    pub fn idle_time(&self, key: &str) -> Option<Duration> {
        self.read()
            .entries
            .peek(key)
            .map(|entry| entry.last_accessed.elapsed())
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn notify(&self, key: &str, value: &V) {
        if let Some(callback) = &self.on_evict {
            callback(key, value);
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState<V>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState<V>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::{Arc, Mutex};
    use std::thread;

    fn cache(max: usize) -> TokenBudgetCache<String> {
        TokenBudgetCache::new(max, None)
    }

    #[test]
    fn set_then_get_hits() {
        let c = cache(4);
        c.set("a", "alpha".to_string(), 5);
        assert_eq!(c.get("a"), Some("alpha".to_string()));

        let stats = c.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.size, 1);
        assert_eq!(stats.total_entry_size, 5);
        assert_eq!(stats.hit_rate, 1.0);
    }

    #[test]
    fn missing_key_counts_miss() {
        let c = cache(4);
        assert_eq!(c.get("nope"), None);
        let stats = c.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.0);
    }

    #[test]
    fn evicts_least_recently_used() {
        let c = cache(2);
        c.set("a", "1".into(), 1);
        c.set("b", "2".into(), 1);
        // Touch "a" so "b" becomes the LRU entry
        assert!(c.get("a").is_some());
        c.set("c", "3".into(), 1);

        assert!(c.contains("a"));
        assert!(!c.contains("b"));
        assert!(c.contains("c"));
        assert_eq!(c.stats().evictions, 1);
    }

    #[test]
    fn set_existing_key_updates_and_promotes() {
        let c = cache(2);
        c.set("a", "1".into(), 1);
        c.set("b", "2".into(), 1);
        c.set("a", "updated".into(), 3);
        c.set("c", "3".into(), 1);

        assert_eq!(c.get("a"), Some("updated".into()));
        assert!(!c.contains("b"));
        assert_eq!(c.stats().total_entry_size, 4);
    }

    #[test]
    fn expired_entry_is_miss_and_expiration_once() {
        let c = TokenBudgetCache::new(4, Some(Duration::from_millis(20)));
        c.set("k", "v".to_string(), 1);
        thread::sleep(Duration::from_millis(40));

        assert_eq!(c.get("k"), None);
        let stats = c.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.size, 0);

        // Second lookup is a plain miss
        assert_eq!(c.get("k"), None);
        let stats = c.stats();
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.expirations, 1);
    }

    #[test]
    fn per_entry_ttl_overrides_default() {
        let c: TokenBudgetCache<u32> = TokenBudgetCache::new(4, Some(Duration::from_millis(10)));
        c.set_with_ttl("forever", 1, 1, None);
        c.set("short", 2, 1);
        thread::sleep(Duration::from_millis(30));

        assert_eq!(c.get("forever"), Some(1));
        assert_eq!(c.get("short"), None);
    }

    #[test]
    fn cleanup_expired_removes_only_stale() {
        let c: TokenBudgetCache<u32> = TokenBudgetCache::new(8, None);
        c.set_with_ttl("stale1", 1, 1, Some(Duration::from_millis(5)));
        c.set_with_ttl("stale2", 2, 1, Some(Duration::from_millis(5)));
        c.set("fresh", 3, 1);
        thread::sleep(Duration::from_millis(25));

        assert_eq!(c.cleanup_expired(), 2);
        assert_eq!(c.keys(), vec!["fresh".to_string()]);
        assert_eq!(c.stats().expirations, 2);
    }

    #[test]
    fn delete_reports_presence() {
        let c = cache(4);
        c.set("a", "1".into(), 1);
        assert!(c.delete("a"));
        assert!(!c.delete("a"));
        assert!(c.is_empty());
    }

    #[test]
    fn callback_sees_evicted_and_cleared_not_deleted() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let c = TokenBudgetCache::new(1, None).with_eviction_callback(Box::new(
            move |key: &str, value: &String| {
                sink.lock().unwrap().push(format!("{key}={value}"));
            },
        ));

        c.set("a", "1".to_string(), 1);
        c.set("b", "2".to_string(), 1); // evicts a
        c.set("c", "3".to_string(), 1); // evicts b
        c.delete("c");
        c.set("d", "4".to_string(), 1);
        c.clear(); // clears d

        assert_eq!(*seen.lock().unwrap(), vec!["a=1", "b=2", "d=4"]);
    }

    #[test]
    fn keys_are_most_recent_first() {
        let c = cache(3);
        c.set("a", "1".into(), 1);
        c.set("b", "2".into(), 1);
        c.set("c", "3".into(), 1);
        c.get("a");
        assert_eq!(c.keys(), vec!["a", "c", "b"]);
    }

    #[test]
    fn get_refreshes_last_access() {
        let c = cache(2);
        c.set("a", "1".into(), 1);
        thread::sleep(Duration::from_millis(20));
        let before = c.idle_time("a").unwrap();
        c.get("a");
        let after = c.idle_time("a").unwrap();
        assert!(after < before);
    }

    #[test]
    fn concurrent_access_keeps_capacity() {
        let c = Arc::new(TokenBudgetCache::<usize>::new(16, None));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let c = Arc::clone(&c);
                thread::spawn(move || {
                    for i in 0..200 {
                        let key = format!("k{}", (t * 31 + i) % 40);
                        if i % 3 == 0 {
                            c.get(&key);
                        } else {
                            c.set(key, i, 1);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(c.len() <= 16);
        let stats = c.stats();
        assert!(stats.hit_rate >= 0.0 && stats.hit_rate <= 1.0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// For any sequence of touches, size stays within capacity and the
        /// evicted key is always the least recently touched one.
        #[test]
        fn prop_lru_eviction_order(
            capacity in 1usize..6,
            ops in prop::collection::vec((any::<bool>(), 0u8..10), 1..60),
        ) {
            let c: TokenBudgetCache<u8> = TokenBudgetCache::new(capacity, None);
            // Reference model: most recent at the back
            let mut model: Vec<u8> = Vec::new();

            for (is_set, k) in ops {
                let key = k.to_string();
                if is_set {
                    c.set(key, k, 1);
                    model.retain(|m| *m != k);
                    model.push(k);
                    if model.len() > capacity {
                        model.remove(0);
                    }
                } else {
                    let hit = c.get(&key).is_some();
                    prop_assert_eq!(hit, model.contains(&k));
                    if hit {
                        model.retain(|m| *m != k);
                        model.push(k);
                    }
                }
                prop_assert!(c.len() <= capacity);
            }

            let mut expected: Vec<String> = model.iter().rev().map(|k| k.to_string()).collect();
            let mut actual = c.keys();
            prop_assert_eq!(&actual, &expected);
            actual.sort();
            expected.sort();
            prop_assert_eq!(actual, expected);
        }
    }
}
