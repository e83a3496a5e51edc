//! L2 Cache - External Network Cache
//!
//! Boundary contract for the remote key/value tier. Implementations own their
//! own retry semantics; the orchestrator only adds a timeout around each call.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::error::{Error, Result};

/// External L2 client
#[async_trait]
pub trait L2Client: Send + Sync {
    /// Get an encoded value
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Store an encoded value with a TTL
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;

    /// Delete a value, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Check for presence
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Get client statistics
    fn stats(&self) -> L2ClientStats;
}

/// L2 client statistics
#[derive(Debug, Clone, Default)]
pub struct L2ClientStats {
    /// Live entries
    pub entries: u64,
    /// Read operations
    pub reads: u64,
    /// Write operations
    pub writes: u64,
    /// Delete operations
    pub deletes: u64,
}

struct StoredValue {
    data: Bytes,
    expires_at: Instant,
}

/// In-process L2 client for tests and local runs
///
/// Uses DashMap so concurrent callers only contend per shard.
#[derive(Default)]
pub struct InMemoryL2Client {
    storage: DashMap<String, StoredValue>,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    /// When set, every call fails as an unreachable remote would
    unavailable: AtomicBool,
    /// Delay added to every call, in microseconds
    latency_us: AtomicU64,
}

impl InMemoryL2Client {
    /// Create a new in-memory client
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the remote going away (or coming back)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Delay every subsequent call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.latency_us.store(micros, Ordering::Relaxed);
    }

    /// Number of `get` calls served so far
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of `set` calls served so far
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    async fn round_trip(&self) {
        let latency = Duration::from_micros(self.latency_us.load(Ordering::Relaxed));
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::Relaxed) {
            Err(Error::L2("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl L2Client for InMemoryL2Client {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.round_trip().await;
        self.check_available()?;

        let now = Instant::now();
        let expired = match self.storage.get(key) {
            Some(stored) if stored.expires_at > now => return Ok(Some(stored.data.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.storage.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.round_trip().await;
        self.check_available()?;

        self.storage.insert(
            key.to_string(),
            StoredValue {
                data: value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.round_trip().await;
        self.check_available()?;
        Ok(self.storage.remove(key).is_some())
    }

    fn stats(&self) -> L2ClientStats {
        L2ClientStats {
            entries: self.storage.len() as u64,
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_set_get_delete() {
        let client = InMemoryL2Client::new();

        client
            .set("k", Bytes::from_static(b"v"), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(client.get("k").await.unwrap(), Some(Bytes::from_static(b"v")));
        assert!(client.exists("k").await.unwrap());

        assert!(client.delete("k").await.unwrap());
        assert!(!client.delete("k").await.unwrap());
        assert_eq!(client.get("k").await.unwrap(), None);

        let stats = client.stats();
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.deletes, 2);
        assert_eq!(stats.entries, 0);
    }

    #[tokio::test]
    async fn test_in_memory_ttl() {
        let client = InMemoryL2Client::new();
        client
            .set("k", Bytes::from_static(b"v"), Duration::from_millis(20))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(client.get("k").await.unwrap(), None);
        assert_eq!(client.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_in_memory_unavailable() {
        let client = InMemoryL2Client::new();
        client.set_unavailable(true);

        assert!(matches!(client.get("k").await, Err(Error::L2(_))));
        assert!(client
            .set("k", Bytes::new(), Duration::from_secs(1))
            .await
            .is_err());

        client.set_unavailable(false);
        assert_eq!(client.get("k").await.unwrap(), None);
        assert_eq!(client.read_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_memory_latency() {
        let client = InMemoryL2Client::new();
        client.set_latency(Duration::from_millis(250));

        let started = tokio::time::Instant::now();
        client
            .set("k", Bytes::from_static(b"v"), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(client.get("k").await.unwrap().is_some());
        assert!(started.elapsed() >= Duration::from_millis(500));

        client.set_latency(Duration::ZERO);
        let started = tokio::time::Instant::now();
        client.get("k").await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(250));
    }
}
