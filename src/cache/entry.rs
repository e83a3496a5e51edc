//! Cache Entry Types
//!
//! Tier identifiers and the metadata-carrying entry stored in L1.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Cache tier, fastest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheTier {
    /// L0 - memory-mapped region
    L0,
    /// L1 - bounded in-process map
    L1,
    /// L2 - external network cache
    L2,
    /// L3 - fetch callback (database-backed producer)
    L3,
}

impl std::fmt::Display for CacheTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheTier::L0 => write!(f, "L0 (Mapped)"),
            CacheTier::L1 => write!(f, "L1 (Memory)"),
            CacheTier::L2 => write!(f, "L2 (Remote)"),
            CacheTier::L3 => write!(f, "L3 (Source)"),
        }
    }
}

/// Priority class used to pick a TTL when none is given explicitly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePriority {
    Hot,
    #[default]
    Normal,
    Cold,
}

/// L1 cache entry
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    key: String,
    value: V,
    created_at: Instant,
    last_accessed: Instant,
    access_count: u64,
    ttl: Duration,
    is_prewarmed: bool,
}

impl<V> CacheEntry<V> {
    /// Create a new entry
    pub fn new(key: impl Into<String>, value: V, ttl: Duration, is_prewarmed: bool) -> Self {
        let now = Instant::now();
        Self {
            key: key.into(),
            value,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            ttl,
            is_prewarmed,
        }
    }

    /// Get key
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get value
    #[inline]
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Consume the entry, returning its value
    pub fn into_value(self) -> V {
        self.value
    }

    #[inline]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    #[inline]
    pub fn last_accessed(&self) -> Instant {
        self.last_accessed
    }

    #[inline]
    pub fn access_count(&self) -> u64 {
        self.access_count
    }

    #[inline]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[inline]
    pub fn is_prewarmed(&self) -> bool {
        self.is_prewarmed
    }

    /// Record an access and return the new count
    pub fn record_access(&mut self) -> u64 {
        // Instant is monotonic, so last_accessed never precedes created_at
        self.last_accessed = Instant::now();
        self.access_count += 1;
        self.access_count
    }

    /// Check if entry has outlived its TTL
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Check expiry against a given instant
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }

    /// TTL left before the entry expires
    pub fn remaining_ttl(&self) -> Duration {
        self.ttl.saturating_sub(self.created_at.elapsed())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_creation() {
        let entry = CacheEntry::new("lead_1", 42u32, Duration::from_secs(60), false);
        assert_eq!(entry.key(), "lead_1");
        assert_eq!(*entry.value(), 42);
        assert_eq!(entry.access_count(), 0);
        assert!(!entry.is_prewarmed());
        assert!(!entry.is_expired());
        assert!(entry.last_accessed() >= entry.created_at());
    }

    #[test]
    fn test_entry_access_tracking() {
        let mut entry = CacheEntry::new("k", "v", Duration::from_secs(60), true);
        assert_eq!(entry.record_access(), 1);
        assert_eq!(entry.record_access(), 2);
        assert_eq!(entry.access_count(), 2);
        assert!(entry.is_prewarmed());
        assert!(entry.last_accessed() >= entry.created_at());
    }

    #[test]
    fn test_entry_expiry() {
        let entry = CacheEntry::new("k", (), Duration::from_secs(10), false);
        let created = entry.created_at();
        assert!(!entry.is_expired_at(created + Duration::from_secs(10)));
        assert!(entry.is_expired_at(created + Duration::from_secs(11)));
    }

    #[test]
    fn test_remaining_ttl() {
        let entry = CacheEntry::new("k", (), Duration::from_secs(60), false);
        let left = entry.remaining_ttl();
        assert!(left <= Duration::from_secs(60));
        assert!(left > Duration::from_secs(59));

        let spent = CacheEntry::new("k", (), Duration::ZERO, false);
        assert_eq!(spent.remaining_ttl(), Duration::ZERO);
    }

    #[test]
    fn test_tier_display() {
        assert_eq!(CacheTier::L0.to_string(), "L0 (Mapped)");
        assert_eq!(CacheTier::L1.to_string(), "L1 (Memory)");
        assert_eq!(CacheTier::L2.to_string(), "L2 (Remote)");
        assert_eq!(CacheTier::L3.to_string(), "L3 (Source)");
    }

    #[test]
    fn test_priority_deserialize() {
        let p: CachePriority = serde_json::from_str("\"hot\"").unwrap();
        assert_eq!(p, CachePriority::Hot);
        assert_eq!(CachePriority::default(), CachePriority::Normal);
    }
}
