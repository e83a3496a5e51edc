//! L1 Cache - Bounded Recency Cache
//!
//! In-process cache capped by entry count with strict LRU eviction and
//! per-entry TTL.
//!
//! # Design
//!
//! - `lru::LruCache` behind a single mutex; lookup+reorder and insert+evict
//!   are each one critical section
//! - Expired entries are purged when touched, never by a sweeper

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;

use super::entry::CacheEntry;

/// L1 Cache - bounded LRU with TTL
pub struct RecencyCache<V> {
    entries: Mutex<LruCache<String, CacheEntry<V>>>,
    capacity: NonZeroUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl<V: Clone> RecencyCache<V> {
    /// Create a cache holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Get an entry and mark it most recently used
    pub fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        let mut entries = self.entries.lock();

        let expired = match entries.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                entry.record_access();
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.pop(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert at the most recently used position, evicting the LRU entry when full
    pub fn set(&self, key: &str, value: V, ttl: Duration, is_prewarmed: bool) {
        let entry = CacheEntry::new(key, value, ttl, is_prewarmed);
        let mut entries = self.entries.lock();
        self.push(&mut entries, key, entry);
    }

    /// Insert only when `key` has no live entry; returns whether it was inserted
    pub fn set_if_absent(&self, key: &str, value: V, ttl: Duration, is_prewarmed: bool) -> bool {
        let mut entries = self.entries.lock();
        if entries.peek(key).is_some_and(|entry| !entry.is_expired()) {
            return false;
        }
        self.push(&mut entries, key, CacheEntry::new(key, value, ttl, is_prewarmed));
        true
    }

    fn push(&self, entries: &mut LruCache<String, CacheEntry<V>>, key: &str, entry: CacheEntry<V>) {
        // push returns the displaced pair: either the old value for this key or the evicted LRU
        if let Some((displaced, _)) = entries.push(key.to_string(), entry) {
            if displaced != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Check for a live entry without touching recency
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .peek(key)
            .is_some_and(|entry| !entry.is_expired())
    }

    /// Remove an entry
    pub fn remove(&self, key: &str) -> Option<CacheEntry<V>> {
        self.entries.lock().pop(key)
    }

    /// Keys containing `fragment`
    pub fn keys_matching(&self, fragment: &str) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|(k, _)| k.contains(fragment))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Number of entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Clear the cache
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Approximate heap + inline footprint of the stored entries
    pub fn approx_memory_bytes(&self) -> u64 {
        let entries = self.entries.lock();
        let per_entry = std::mem::size_of::<CacheEntry<V>>() + std::mem::size_of::<String>();
        entries
            .iter()
            .map(|(k, e)| (per_entry + k.len() + e.key().len()) as u64)
            .sum()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Get hit ratio
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Get cache statistics
    pub fn stats(&self) -> L1Stats {
        L1Stats {
            entries: self.len(),
            capacity: self.capacity(),
            hits: self.hits(),
            misses: self.misses(),
            hit_ratio: self.hit_ratio(),
            evictions: self.evictions(),
            expirations: self.expirations.load(Ordering::Relaxed),
            approx_memory_bytes: self.approx_memory_bytes(),
        }
    }
}

/// L1 cache statistics
#[derive(Debug, Clone)]
pub struct L1Stats {
    /// Number of entries
    pub entries: usize,
    /// Maximum number of entries
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    /// Hit ratio (0.0 - 1.0)
    pub hit_ratio: f64,
    /// Capacity evictions
    pub evictions: u64,
    /// Entries purged on access after their TTL
    pub expirations: u64,
    pub approx_memory_bytes: u64,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_l1_put_get() {
        let cache = RecencyCache::new(4);
        cache.set("lead_1", "score=87".to_string(), HOUR, false);

        let entry = cache.get("lead_1").unwrap();
        assert_eq!(entry.value(), "score=87");
        assert_eq!(entry.access_count(), 1);
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn test_l1_miss() {
        let cache: RecencyCache<u32> = RecencyCache::new(4);
        assert!(cache.get("missing").is_none());
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hit_ratio(), 0.0);
    }

    #[test]
    fn test_l1_evicts_first_inserted_when_over_capacity() {
        let cache = RecencyCache::new(3);
        for i in 0..4 {
            cache.set(&format!("k{}", i), i, HOUR, false);
        }

        assert!(cache.get("k0").is_none());
        for i in 1..4 {
            assert!(cache.get(&format!("k{}", i)).is_some());
        }
        assert_eq!(cache.evictions(), 1);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_l1_access_refreshes_recency() {
        let cache = RecencyCache::new(10);
        for i in 0..10 {
            cache.set(&format!("k{}", i), i, HOUR, false);
        }

        assert!(cache.get("k0").is_some());
        cache.set("k10", 10, HOUR, false);

        assert!(cache.get("k1").is_none());
        assert!(cache.get("k0").is_some());
        for i in 2..=10 {
            assert!(cache.get(&format!("k{}", i)).is_some(), "k{} missing", i);
        }
    }

    #[test]
    fn test_l1_replace_does_not_count_eviction() {
        let cache = RecencyCache::new(2);
        cache.set("k", 1, HOUR, false);
        cache.set("k", 2, HOUR, true);

        let entry = cache.get("k").unwrap();
        assert_eq!(*entry.value(), 2);
        assert!(entry.is_prewarmed());
        assert_eq!(cache.evictions(), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_l1_ttl_expiry_purges_on_access() {
        let cache = RecencyCache::new(4);
        cache.set("short", 1, Duration::from_millis(30), false);
        cache.set("long", 2, HOUR, false);

        std::thread::sleep(Duration::from_millis(60));

        assert!(!cache.contains("short"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("short").is_none());
        assert_eq!(cache.len(), 1);
        assert!(cache.get("long").is_some());
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_l1_set_if_absent() {
        let cache = RecencyCache::new(4);
        let ttl = Duration::from_secs(60);

        assert!(cache.set_if_absent("k", "first", ttl, true));
        assert!(!cache.set_if_absent("k", "second", ttl, true));
        assert_eq!(*cache.get("k").unwrap().value(), "first");

        cache.set("gone", "old", Duration::from_millis(10), false);
        std::thread::sleep(Duration::from_millis(25));
        assert!(cache.set_if_absent("gone", "new", ttl, true));
        assert!(cache.get("gone").unwrap().is_prewarmed());
    }

    #[test]
    fn test_l1_contains_does_not_reorder() {
        let cache = RecencyCache::new(2);
        cache.set("a", 1, HOUR, false);
        cache.set("b", 2, HOUR, false);

        assert!(cache.contains("a"));
        cache.set("c", 3, HOUR, false);

        // "a" was still LRU despite the contains() call
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
    }

    #[test]
    fn test_l1_remove_and_clear() {
        let cache = RecencyCache::new(4);
        cache.set("user:1:profile", 1, HOUR, false);
        cache.set("user:1:leads", 2, HOUR, false);
        cache.set("user:2:profile", 3, HOUR, false);

        let mut keys = cache.keys_matching("user:1");
        keys.sort();
        assert_eq!(keys, vec!["user:1:leads", "user:1:profile"]);

        assert!(cache.remove("user:1:leads").is_some());
        assert!(cache.remove("user:1:leads").is_none());

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_l1_zero_capacity_clamped() {
        let cache = RecencyCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.set("a", 1, HOUR, false);
        assert!(cache.get("a").is_some());
    }

    #[test]
    fn test_l1_memory_estimate_grows() {
        let cache = RecencyCache::new(8);
        assert_eq!(cache.approx_memory_bytes(), 0);
        cache.set("a", 1u64, HOUR, false);
        let one = cache.approx_memory_bytes();
        cache.set("b", 2u64, HOUR, false);
        assert!(cache.approx_memory_bytes() > one);
    }

    #[test]
    fn test_l1_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let cache = Arc::new(RecencyCache::new(10_000));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..500 {
                        let key = format!("obj-{}-{}", t, i);
                        cache.set(&key, i, HOUR, false);
                        assert_eq!(*cache.get(&key).unwrap().value(), i);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 4000);
    }
}
