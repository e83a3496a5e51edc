//! Cache Manager - Predictive Multi-Tier Cache
//!
//! Orchestrates the mapped L0 region, the L1 recency cache and an optional
//! external L2 client. Reads walk L0 → L1 → L2 and promote upward; writes go
//! through every tier; misses fall back to a caller-supplied fetch. The
//! pattern analyzer is fed from every read and write that names a user, and
//! its predictions drive prewarming.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use super::codec;
use super::config::CacheConfig;
use super::entry::{CachePriority, CacheTier};
use super::l0::MappedRegion;
use super::l1::RecencyCache;
use super::l2::L2Client;
use super::metrics::{CacheMetrics, CacheMetricsSnapshot, LatencyTracker};
use crate::error::{Error, Result};
use crate::prediction::PatternAnalyzer;

/// Options for [`PredictiveCache::set_with`]
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Explicit TTL; overrides the priority TTL
    pub ttl: Option<Duration>,
    /// Selects the TTL when none is given
    pub priority: CachePriority,
    /// Record the write as an access by this user
    pub user: Option<String>,
    /// Tag the L1 entry as prewarmed
    pub prewarmed: bool,
}

impl SetOptions {
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Default::default()
        }
    }

    pub fn priority(priority: CachePriority) -> Self {
        Self {
            priority,
            ..Default::default()
        }
    }

    pub fn for_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

/// Predictive multi-tier cache
pub struct PredictiveCache<V> {
    config: CacheConfig,
    /// L0 (mapped region)
    l0: MappedRegion,
    /// L1 (in-process LRU)
    l1: RecencyCache<V>,
    /// L2 (external), optional
    l2: Option<Arc<dyn L2Client>>,
    analyzer: PatternAnalyzer,
    metrics: Arc<CacheMetrics>,
    /// Keys warmed by prediction and not yet hit, with their warm time
    warmed: DashMap<String, Instant>,
}

impl<V> PredictiveCache<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Validate the configuration, map the L0 region and build the tiers
    pub fn open(config: CacheConfig, l2: Option<Arc<dyn L2Client>>) -> Result<Self> {
        config.validate()?;
        let l0 = MappedRegion::open(&config.l0_path, config.l0_capacity_bytes)?;
        let l1 = RecencyCache::new(config.l1_max_entries);
        let analyzer = PatternAnalyzer::new(config.analyzer.clone());

        info!(
            l0_path = %config.l0_path.display(),
            l0_capacity = config.l0_capacity_bytes,
            l1_capacity = config.l1_max_entries,
            l2 = l2.is_some(),
            "Predictive cache opened"
        );

        Ok(Self {
            config,
            l0,
            l1,
            l2,
            analyzer,
            metrics: Arc::new(CacheMetrics::new()),
            warmed: DashMap::new(),
        })
    }

    /// Look up `key` without fetching.
    ///
    /// Returns `(value, was_cached)`; a miss is `(None, false)`.
    #[instrument(skip(self), level = "debug")]
    pub async fn get(&self, key: &str, user: Option<&str>) -> (Option<V>, bool) {
        let tracker = self.begin_request(key, user);
        let found = self.lookup(key).await;
        let result = match found {
            Some((value, tier)) => {
                self.record_hit(key, tier);
                (Some(value), true)
            }
            None => {
                self.metrics.record_miss();
                (None, false)
            }
        };
        self.metrics.record_latency(tracker.elapsed());
        result
    }

    /// Look up `key`, invoking `fetch` on a total miss.
    ///
    /// A fetched value is stored in every tier and returned with
    /// `was_cached = false`. Fetch failures and timeouts are returned as
    /// errors and leave the cache untouched.
    #[instrument(skip(self, fetch), level = "debug")]
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        user: Option<&str>,
        fetch: F,
    ) -> Result<(V, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        let tracker = self.begin_request(key, user);

        if let Some((value, tier)) = self.lookup(key).await {
            self.record_hit(key, tier);
            self.metrics.record_latency(tracker.elapsed());
            return Ok((value, true));
        }
        self.metrics.record_miss();

        let fetched = self.run_fetch(key, fetch()).await;
        let result = match fetched {
            Ok(value) => {
                self.metrics.record_hit(CacheTier::L3);
                self.store(key, &value, self.config.default_ttl(), false).await;
                Ok((value, false))
            }
            Err(e) => Err(e),
        };
        self.metrics.record_latency(tracker.elapsed());
        result
    }

    /// Write through every tier with the default TTL
    pub async fn set(&self, key: &str, value: V) -> bool {
        self.set_with(key, value, SetOptions::default()).await
    }

    /// Write through every tier.
    ///
    /// Tier failures are logged and do not stop the remaining writes. Returns
    /// true when the L0 write succeeded.
    #[instrument(skip(self, value, options), level = "debug")]
    pub async fn set_with(&self, key: &str, value: V, options: SetOptions) -> bool {
        if let Some(user) = options.user.as_deref() {
            self.analyzer.record_access(user, key);
        }
        let ttl = options
            .ttl
            .unwrap_or_else(|| self.config.ttl_for(options.priority));
        self.store(key, &value, ttl, options.prewarmed).await
    }

    /// Warm the user's predicted keys.
    ///
    /// Predictions at or above the configured threshold that are not cached in
    /// any tier are fetched and stored as prewarmed. A failed fetch is logged
    /// and skipped. Returns the keys actually warmed.
    #[instrument(skip(self, fetch))]
    pub async fn predict_and_warm<F, Fut>(&self, user: &str, top_n: usize, fetch: F) -> Vec<String>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        self.sweep_stale_predictions();

        let predictions = self.analyzer.predictions_for_user(user, top_n);
        self.metrics.record_predictions(predictions.len() as u64);

        let threshold = self.config.prediction_threshold;
        let keys: Vec<String> = predictions
            .into_iter()
            .filter(|p| p.confidence >= threshold)
            .map(|p| p.key)
            .collect();
        if keys.is_empty() {
            debug!(user, "No predictions above threshold");
            return Vec::new();
        }

        let warmed = self.warm_keys(keys, fetch).await;
        if !warmed.is_empty() {
            info!(user, count = warmed.len(), keys = ?warmed, "Prewarmed predicted keys");
        }
        warmed
    }

    /// Warm an explicit key list, skipping keys already cached.
    ///
    /// A key written by someone else while its fetch was in flight keeps that
    /// value and is not reported as warmed.
    pub async fn warm_keys<F, Fut>(&self, keys: Vec<String>, fetch: F) -> Vec<String>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        let mut warmed = Vec::new();
        for key in keys {
            if self.is_cached(&key).await {
                continue;
            }

            match self.run_fetch(&key, fetch(key.clone())).await {
                Ok(value) => {
                    if self.is_cached(&key).await {
                        debug!(key = %key, "Key cached during prewarm fetch, keeping it");
                        continue;
                    }
                    let ttl = self.config.ttl_for(CachePriority::Hot);
                    if self.store_prewarmed(&key, &value, ttl).await {
                        self.warmed.insert(key.clone(), Instant::now());
                        warmed.push(key);
                    } else {
                        debug!(key = %key, "Key cached during prewarm store, keeping it");
                    }
                }
                Err(e) => {
                    self.metrics.record_warm_failure();
                    warn!(key = %key, error = %e, "Prewarm fetch failed, skipping key");
                }
            }
        }
        self.metrics.record_warmed(warmed.len() as u64);
        warmed
    }

    /// Remove `key` from every tier
    pub async fn invalidate(&self, key: &str) -> bool {
        let mut removed = self.l0.remove(key);
        removed |= self.l1.remove(key).is_some();
        self.warmed.remove(key);

        if let Some(l2) = &self.l2 {
            match timeout(self.config.l2_timeout(), l2.delete(key)).await {
                Ok(Ok(existed)) => removed |= existed,
                Ok(Err(e)) => self.l2_failed(key, "delete", &e),
                Err(_) => self.l2_timed_out(key, "delete"),
            }
        }
        removed
    }

    /// Remove every locally cached key containing `fragment`; returns the count
    pub async fn invalidate_matching(&self, fragment: &str) -> usize {
        let mut keys = self.l0.keys_matching(fragment);
        keys.extend(self.l1.keys_matching(fragment));
        keys.sort();
        keys.dedup();

        for key in &keys {
            self.invalidate(key).await;
        }
        info!(fragment, count = keys.len(), "Invalidated matching keys");
        keys.len()
    }

    /// Check whether `key` is cached in any tier without touching metrics
    pub async fn is_cached(&self, key: &str) -> bool {
        if self.l0.contains(key) || self.l1.contains(key) {
            return true;
        }
        let Some(l2) = &self.l2 else {
            return false;
        };
        match timeout(self.config.l2_timeout(), l2.exists(key)).await {
            Ok(Ok(exists)) => exists,
            Ok(Err(e)) => {
                self.l2_failed(key, "exists", &e);
                false
            }
            Err(_) => {
                self.l2_timed_out(key, "exists");
                false
            }
        }
    }

    /// Current metrics, with memory gauges refreshed
    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.sweep_stale_predictions();
        self.update_stats();
        self.metrics.snapshot()
    }

    /// Count warmed keys unused past the validation window as wrong predictions
    pub fn sweep_stale_predictions(&self) -> usize {
        let window = self.config.prediction_validation_window();
        let before = self.warmed.len();
        self.warmed.retain(|_, warmed_at| {
            let fresh = warmed_at.elapsed() <= window;
            if !fresh {
                self.metrics.record_prediction_outcome(false);
            }
            fresh
        });
        before.saturating_sub(self.warmed.len())
    }

    /// Flush and unmap L0 and drop L1; idempotent
    pub fn close(&self) -> Result<()> {
        self.l1.clear();
        self.warmed.clear();
        self.l0.close()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn analyzer(&self) -> &PatternAnalyzer {
        &self.analyzer
    }

    /// Get reference to the L0 region
    pub fn l0(&self) -> &MappedRegion {
        &self.l0
    }

    /// Get reference to the L1 cache
    pub fn l1(&self) -> &RecencyCache<V> {
        &self.l1
    }

    pub fn l2(&self) -> Option<&Arc<dyn L2Client>> {
        self.l2.as_ref()
    }

    fn begin_request(&self, key: &str, user: Option<&str>) -> LatencyTracker {
        let tracker = LatencyTracker::start();
        self.metrics.record_request();
        if let Some(user) = user {
            self.analyzer.record_access(user, key);
        }
        tracker
    }

    /// Check L0, L1 and L2 in order, promoting lower-tier hits upward
    async fn lookup(&self, key: &str) -> Option<(V, CacheTier)> {
        if let Some(value) = self.l0.get::<V>(key) {
            debug!(key, tier = %CacheTier::L0, "Cache hit");
            return Some((value, CacheTier::L0));
        }

        if let Some(entry) = self.l1.get(key) {
            let ttl = entry.remaining_ttl();
            let value = entry.into_value();
            if let Err(e) = self.l0.set_with_ttl(key, &value, ttl) {
                warn!(key, error = %e, "Failed to promote L1 hit into L0");
            }
            debug!(key, tier = %CacheTier::L1, "Cache hit");
            return Some((value, CacheTier::L1));
        }

        let l2 = self.l2.as_ref()?;
        let bytes = match timeout(self.config.l2_timeout(), l2.get(key)).await {
            Ok(Ok(Some(bytes))) => bytes,
            Ok(Ok(None)) => return None,
            Ok(Err(e)) => {
                self.l2_failed(key, "get", &e);
                return None;
            }
            Err(_) => {
                self.l2_timed_out(key, "get");
                return None;
            }
        };

        let value: V = match codec::decode(&bytes) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Undecodable L2 value treated as miss");
                return None;
            }
        };
        let ttl = self.config.default_ttl();
        self.l1.set(key, value.clone(), ttl, false);
        if let Err(e) = self.l0.set_bytes_with_ttl(key, &bytes, ttl) {
            warn!(key, error = %e, "Failed to promote L2 hit into L0");
        }
        debug!(key, tier = %CacheTier::L2, "Cache hit");
        Some((value, CacheTier::L2))
    }

    /// Write `value` to every tier; true when L0 accepted it
    async fn store(&self, key: &str, value: &V, ttl: Duration, prewarmed: bool) -> bool {
        let bytes = match codec::encode(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "Failed to encode value, nothing stored");
                return false;
            }
        };

        let stored = match self.l0.set_bytes_with_ttl(key, &bytes, ttl) {
            Ok(_) => true,
            Err(e) => {
                warn!(key, error = %e, "L0 write failed");
                false
            }
        };

        self.l1.set(key, value.clone(), ttl, prewarmed);
        self.write_l2(key, bytes, ttl).await;
        stored
    }

    /// Store a prewarmed value unless `key` gained a live entry meanwhile.
    ///
    /// L0 and L1 are written with insert-if-absent so a concurrent foreground
    /// write always wins. Returns whether the value was stored.
    async fn store_prewarmed(&self, key: &str, value: &V, ttl: Duration) -> bool {
        let bytes = match codec::encode(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "Failed to encode prewarmed value");
                return false;
            }
        };

        match self.l0.set_bytes_if_absent(key, &bytes, ttl) {
            Ok(Some(_)) => {}
            Ok(None) => return false,
            Err(e) => warn!(key, error = %e, "L0 write failed"),
        }
        if !self.l1.set_if_absent(key, value.clone(), ttl, true) {
            return false;
        }
        self.write_l2(key, bytes, ttl).await;
        true
    }

    async fn write_l2(&self, key: &str, bytes: Bytes, ttl: Duration) {
        if let Some(l2) = &self.l2 {
            match timeout(self.config.l2_timeout(), l2.set(key, bytes, ttl)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => self.l2_failed(key, "set", &e),
                Err(_) => self.l2_timed_out(key, "set"),
            }
        }
    }

    async fn run_fetch<Fut>(&self, key: &str, fut: Fut) -> Result<V>
    where
        Fut: Future<Output = anyhow::Result<V>>,
    {
        let limit = self.config.fetch_timeout();
        match timeout(limit, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => {
                self.metrics.record_fetch_failure();
                Err(Error::Fetch {
                    key: key.to_string(),
                    source,
                })
            }
            Err(_) => {
                self.metrics.record_fetch_failure();
                Err(Error::FetchTimeout {
                    key: key.to_string(),
                    timeout: limit,
                })
            }
        }
    }

    fn record_hit(&self, key: &str, tier: CacheTier) {
        self.metrics.record_hit(tier);
        if self.warmed.remove(key).is_some() {
            self.metrics.record_warm_hit();
            self.metrics.record_prediction_outcome(true);
        } else {
            self.metrics.record_cold_hit();
        }
    }

    fn l2_failed(&self, key: &str, op: &str, error: &Error) {
        self.metrics.record_l2_failure();
        warn!(key, op, error = %error, "L2 call failed, continuing without it");
    }

    fn l2_timed_out(&self, key: &str, op: &str) {
        self.metrics.record_l2_failure();
        warn!(
            key,
            op,
            timeout_ms = self.config.l2_timeout_ms,
            "L2 call timed out, continuing without it"
        );
    }

    /// Update memory gauges
    fn update_stats(&self) {
        let l0 = self.l0.stats();
        self.metrics
            .update_l0_stats(l0.size_bytes as u64, l0.entries as u64, l0.resets);
        self.metrics.update_l1_stats(
            self.l1.approx_memory_bytes(),
            self.l1.len() as u64,
            self.l1.evictions(),
        );
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::l2::InMemoryL2Client;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> CacheConfig {
        CacheConfig {
            l0_capacity_bytes: 64 * 1024,
            l1_max_entries: 64,
            ..CacheConfig::with_l0_path(dir.path().join("l0.bin"))
        }
    }

    fn open(dir: &TempDir) -> PredictiveCache<String> {
        PredictiveCache::open(config(dir), None).unwrap()
    }

    fn open_with_l2(dir: &TempDir) -> (PredictiveCache<String>, Arc<InMemoryL2Client>) {
        let l2 = Arc::new(InMemoryL2Client::new());
        let cache =
            PredictiveCache::open(config(dir), Some(l2.clone() as Arc<dyn L2Client>)).unwrap();
        (cache, l2)
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        assert!(cache.set("lead_1", "score=91".to_string()).await);
        let (value, cached) = cache.get("lead_1", None).await;
        assert_eq!(value.as_deref(), Some("score=91"));
        assert!(cached);

        let metrics = cache.metrics();
        assert_eq!(metrics.l0_hits, 1);
        assert_eq!(metrics.cold_hits, 1);
        assert_eq!(metrics.l0_entries, 1);
    }

    #[tokio::test]
    async fn test_miss_without_fetch() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        assert_eq!(cache.get("nope", None).await, (None, false));
        let metrics = cache.metrics();
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.total_requests, 1);
        assert_eq!(metrics.hit_rate, 0.0);
    }

    #[tokio::test]
    async fn test_l1_hit_promotes_into_l0() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        cache.set("k", "v".to_string()).await;
        cache.l0().remove("k");

        let (value, cached) = cache.get("k", None).await;
        assert_eq!(value.as_deref(), Some("v"));
        assert!(cached);
        assert!(cache.l0().contains("k"));

        cache.get("k", None).await;
        let metrics = cache.metrics();
        assert_eq!(metrics.l1_hits, 1);
        assert_eq!(metrics.l0_hits, 1);
    }

    #[tokio::test]
    async fn test_fetch_on_miss_stores_value() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        let (value, cached) = cache
            .get_or_fetch("lead_7", None, || async { Ok("fresh".to_string()) })
            .await
            .unwrap();
        assert_eq!(value, "fresh");
        assert!(!cached);

        let (value, cached) = cache
            .get_or_fetch("lead_7", None, || async { anyhow::bail!("must not be called") })
            .await
            .unwrap();
        assert_eq!(value, "fresh");
        assert!(cached);

        let metrics = cache.metrics();
        assert_eq!(metrics.l3_hits, 1);
        assert_eq!(metrics.misses, 1);
        assert!((metrics.hit_rate - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_fetch_error_propagates() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        let err = cache
            .get_or_fetch("lead_9", None, || async {
                Err::<String, _>(anyhow::anyhow!("db down"))
            })
            .await
            .unwrap_err();
        assert_matches!(err, Error::Fetch { ref key, .. } if key == "lead_9");
        assert!(!cache.is_cached("lead_9").await);
        assert_eq!(cache.metrics().fetch_failures, 1);
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let dir = TempDir::new().unwrap();
        let cfg = CacheConfig {
            fetch_timeout_ms: 20,
            ..config(&dir)
        };
        let cache: PredictiveCache<String> = PredictiveCache::open(cfg, None).unwrap();

        let err = cache
            .get_or_fetch("slow", None, || async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok("late".to_string())
            })
            .await
            .unwrap_err();
        assert_matches!(err, Error::FetchTimeout { .. });
        assert!(!cache.is_cached("slow").await);
    }

    #[tokio::test]
    async fn test_l2_hit_promotes() {
        let dir = TempDir::new().unwrap();
        let (cache, l2) = open_with_l2(&dir);
        let encoded = codec::encode(&"remote".to_string()).unwrap();
        l2.set("shared", encoded, Duration::from_secs(60)).await.unwrap();

        let (value, cached) = cache.get("shared", None).await;
        assert_eq!(value.as_deref(), Some("remote"));
        assert!(cached);
        let reads = l2.read_count();

        let (value, _) = cache.get("shared", None).await;
        assert_eq!(value.as_deref(), Some("remote"));
        assert_eq!(l2.read_count(), reads);

        let metrics = cache.metrics();
        assert_eq!(metrics.l2_hits, 1);
        assert_eq!(metrics.l0_hits, 1);
    }

    #[tokio::test]
    async fn test_l2_unavailable_degrades() {
        let dir = TempDir::new().unwrap();
        let (cache, l2) = open_with_l2(&dir);
        l2.set_unavailable(true);

        assert!(cache.set("k", "v".to_string()).await);
        assert_eq!(cache.get("k", None).await.0.as_deref(), Some("v"));
        assert_eq!(cache.get("absent", None).await, (None, false));

        let metrics = cache.metrics();
        assert_eq!(metrics.l2_failures, 2);
        assert_eq!(metrics.misses, 1);
    }

    #[tokio::test]
    async fn test_priority_ttl() {
        let dir = TempDir::new().unwrap();
        let cfg = CacheConfig {
            cold_ttl_secs: 0,
            ..config(&dir)
        };
        let cache: PredictiveCache<String> = PredictiveCache::open(cfg, None).unwrap();

        cache
            .set_with("cold", "c".into(), SetOptions::priority(CachePriority::Cold))
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!cache.l1().contains("cold"));
        assert_eq!(cache.get("cold", None).await, (None, false));

        cache
            .set_with("explicit", "e".into(), SetOptions::ttl(Duration::from_secs(60)))
            .await;
        assert!(cache.l1().contains("explicit"));
    }

    #[tokio::test]
    async fn test_set_records_user_access() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        cache
            .set_with("doc_1", "a".into(), SetOptions::default().for_user("agent"))
            .await;
        cache.get("doc_2", Some("agent")).await;
        assert_eq!(cache.analyzer().history_for_user("agent").len(), 2);
    }

    #[tokio::test]
    async fn test_entry_too_large_reports_false() {
        let dir = TempDir::new().unwrap();
        let cfg = CacheConfig {
            l0_capacity_bytes: 16,
            ..config(&dir)
        };
        let cache: PredictiveCache<String> = PredictiveCache::open(cfg, None).unwrap();

        assert!(!cache.set("big", "x".repeat(64)).await);
        // L1 still took the write
        assert_eq!(cache.get("big", None).await.0.map(|v| v.len()), Some(64));
    }

    #[tokio::test]
    async fn test_predict_and_warm_then_hit() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        for i in 1..=5 {
            cache.get(&format!("lead_{}", i), Some("agent")).await;
        }

        let fetches = AtomicUsize::new(0);
        let warmed = cache
            .predict_and_warm("agent", 5, |key| {
                fetches.fetch_add(1, Ordering::SeqCst);
                async move { Ok(format!("value-of-{}", key)) }
            })
            .await;
        assert!(warmed.contains(&"lead_6".to_string()));
        let after_warm = fetches.load(Ordering::SeqCst);

        let (value, cached) = cache
            .get_or_fetch("lead_6", Some("agent"), || async {
                anyhow::bail!("should be warm")
            })
            .await
            .unwrap();
        assert!(cached);
        assert_eq!(value, "value-of-lead_6");
        assert_eq!(fetches.load(Ordering::SeqCst), after_warm);

        let metrics = cache.metrics();
        assert_eq!(metrics.warm_hits, 1);
        assert_eq!(metrics.predictions_correct, 1);
        assert!(metrics.predictions_made >= 1);
    }

    #[tokio::test]
    async fn test_warm_failure_does_not_abort_batch() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        let warmed = cache
            .warm_keys(
                vec!["a".into(), "bad".into(), "c".into()],
                |key| async move {
                    if key == "bad" {
                        anyhow::bail!("no such record");
                    }
                    Ok(key.to_uppercase())
                },
            )
            .await;
        assert_eq!(warmed, vec!["a".to_string(), "c".to_string()]);
        assert!(cache.l1().get("a").unwrap().is_prewarmed());
        assert_eq!(cache.metrics().warm_failures, 1);
    }

    #[tokio::test]
    async fn test_warm_skips_cached_keys() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        cache.set("a", "old".into()).await;

        let warmed = cache
            .warm_keys(vec!["a".into(), "b".into()], |key| async move { Ok(key) })
            .await;
        assert_eq!(warmed, vec!["b".to_string()]);
        assert_eq!(cache.get("a", None).await.0.as_deref(), Some("old"));
    }

    #[tokio::test]
    async fn test_stale_predictions_count_as_incorrect() {
        let dir = TempDir::new().unwrap();
        let cfg = CacheConfig {
            prediction_validation_secs: 0,
            ..config(&dir)
        };
        let cache: PredictiveCache<String> = PredictiveCache::open(cfg, None).unwrap();

        cache
            .warm_keys(vec!["x".into()], |key| async move { Ok(key) })
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let metrics = cache.metrics();
        assert_eq!(metrics.predictions_incorrect, 1);
        assert_eq!(metrics.prediction_accuracy, 0.0);

        // No longer tracked, so a later hit is cold
        cache.get("x", None).await;
        assert_eq!(cache.metrics().cold_hits, 1);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let dir = TempDir::new().unwrap();
        let (cache, l2) = open_with_l2(&dir);
        cache.set("user:1:profile", "p".into()).await;
        cache.set("user:1:leads", "l".into()).await;
        cache.set("user:2:profile", "q".into()).await;

        assert!(cache.invalidate("user:2:profile").await);
        assert!(!cache.is_cached("user:2:profile").await);

        assert_eq!(cache.invalidate_matching("user:1").await, 2);
        assert_eq!(cache.get("user:1:leads", None).await, (None, false));
        assert_eq!(l2.stats().entries, 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        cache.set("k", "v".into()).await;

        cache.close().unwrap();
        cache.close().unwrap();
        assert!(!cache.l0().is_open());
        assert!(!cache.set("k", "v".into()).await);
    }

    #[tokio::test]
    async fn test_ttl_expiry_applies_to_l0() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        cache
            .set_with("s", "v".into(), SetOptions::ttl(Duration::from_millis(20)))
            .await;
        assert_eq!(cache.get("s", None).await, (Some("v".to_string()), true));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get("s", None).await, (None, false));
        assert!(!cache.is_cached("s").await);
    }

    #[tokio::test]
    async fn test_l1_promotion_keeps_remaining_ttl() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        cache
            .set_with("s", "v".into(), SetOptions::ttl(Duration::from_millis(50)))
            .await;
        cache.l0().remove("s");
        assert_eq!(cache.get("s", None).await.0.as_deref(), Some("v"));
        assert!(cache.l0().contains("s"));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.get("s", None).await, (None, false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_foreground_write_during_warm_fetch_wins() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        let warm = cache.warm_keys(vec!["lead_8".into()], |key| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(format!("stale-prediction:{}", key))
        });
        let foreground = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cache.set("lead_8", "fresh-foreground".into()).await
        };
        let (warmed, stored) = tokio::join!(warm, foreground);

        assert!(stored);
        assert!(warmed.is_empty());
        assert_eq!(cache.get("lead_8", None).await.0.as_deref(), Some("fresh-foreground"));

        let metrics = cache.metrics();
        assert_eq!(metrics.keys_warmed, 0);
        assert_eq!(metrics.warm_hits, 0);
        assert_eq!(metrics.cold_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_warm_fetch_timeout_skips_key() {
        let dir = TempDir::new().unwrap();
        let cfg = CacheConfig {
            fetch_timeout_ms: 20,
            ..config(&dir)
        };
        let cache: PredictiveCache<String> = PredictiveCache::open(cfg, None).unwrap();

        let warmed = cache
            .warm_keys(vec!["slow".into(), "fast".into()], |key| async move {
                if key == "slow" {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                Ok(key)
            })
            .await;
        assert_eq!(warmed, vec!["fast".to_string()]);
        assert!(!cache.is_cached("slow").await);

        let metrics = cache.metrics();
        assert_eq!(metrics.warm_failures, 1);
        assert_eq!(metrics.fetch_failures, 1);
    }

    fn open_with_slow_l2(dir: &TempDir) -> (PredictiveCache<String>, Arc<InMemoryL2Client>) {
        let l2 = Arc::new(InMemoryL2Client::new());
        l2.set_latency(Duration::from_millis(500));
        let cfg = CacheConfig {
            l2_timeout_ms: 20,
            ..config(dir)
        };
        let cache = PredictiveCache::open(cfg, Some(l2.clone() as Arc<dyn L2Client>)).unwrap();
        (cache, l2)
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_l2_get_falls_through_to_fetch() {
        let dir = TempDir::new().unwrap();
        let (cache, l2) = open_with_slow_l2(&dir);

        let (value, cached) = cache
            .get_or_fetch("lead_3", None, || async { Ok("from-source".to_string()) })
            .await
            .unwrap();
        assert_eq!(value, "from-source");
        assert!(!cached);
        assert_eq!(l2.read_count(), 1);

        // The read and the write-through both timed out
        let metrics = cache.metrics();
        assert_eq!(metrics.l2_failures, 2);
        assert_eq!(metrics.l3_hits, 1);
        assert_eq!(cache.get("lead_3", None).await.0.as_deref(), Some("from-source"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_l2_set_still_stores_locally() {
        let dir = TempDir::new().unwrap();
        let (cache, l2) = open_with_slow_l2(&dir);

        assert!(cache.set("k", "v".into()).await);
        assert!(cache.l0().contains("k"));
        assert!(cache.l1().contains("k"));
        assert_eq!(l2.stats().entries, 0);
        assert_eq!(cache.metrics().l2_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_l2_exists_and_delete_time_out() {
        let dir = TempDir::new().unwrap();
        let (cache, _l2) = open_with_slow_l2(&dir);

        assert!(!cache.is_cached("absent").await);
        assert_eq!(cache.metrics().l2_failures, 1);

        cache.set("k", "v".into()).await;
        assert!(cache.invalidate("k").await);
        assert!(!cache.l0().contains("k"));
        assert_eq!(cache.metrics().l2_failures, 3);
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let dir = TempDir::new().unwrap();
        let cfg = CacheConfig {
            prediction_threshold: 1.5,
            ..config(&dir)
        };
        let result = PredictiveCache::<String>::open(cfg, None);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
