//! Cache Metrics Collection
//!
//! Counters for every tier decision the orchestrator makes, plus derived
//! ratios. All reads are safe with zero samples: a ratio with an empty
//! denominator is 0.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use super::entry::CacheTier;

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    total_requests: AtomicU64,

    // Per-tier hits; L3 counts values produced by a fetch callback
    l0_hits: AtomicU64,
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    l3_hits: AtomicU64,
    misses: AtomicU64,

    warm_hits: AtomicU64,
    cold_hits: AtomicU64,

    predictions_made: AtomicU64,
    predictions_correct: AtomicU64,
    predictions_incorrect: AtomicU64,
    keys_warmed: AtomicU64,
    warm_failures: AtomicU64,

    // Incremental mean: total / samples
    latency_total_us: AtomicU64,
    latency_samples: AtomicU64,

    l2_failures: AtomicU64,
    fetch_failures: AtomicU64,

    // Gauges refreshed on snapshot
    l0_size_bytes: AtomicU64,
    l0_entries: AtomicU64,
    l0_resets: AtomicU64,
    l1_size_bytes: AtomicU64,
    l1_entries: AtomicU64,
    l1_evictions: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a hit served by `tier`
    pub fn record_hit(&self, tier: CacheTier) {
        let counter = match tier {
            CacheTier::L0 => &self.l0_hits,
            CacheTier::L1 => &self.l1_hits,
            CacheTier::L2 => &self.l2_hits,
            CacheTier::L3 => &self.l3_hits,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_warm_hit(&self) {
        self.warm_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cold_hit(&self) {
        self.cold_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_predictions(&self, count: u64) {
        self.predictions_made.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_prediction_outcome(&self, correct: bool) {
        if correct {
            self.predictions_correct.fetch_add(1, Ordering::Relaxed);
        } else {
            self.predictions_incorrect.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_warmed(&self, count: u64) {
        self.keys_warmed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_warm_failure(&self) {
        self.warm_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_l2_failure(&self) {
        self.l2_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_failure(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_latency(&self, duration: Duration) {
        let us = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.latency_total_us.fetch_add(us, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn update_l0_stats(&self, size: u64, entries: u64, resets: u64) {
        self.l0_size_bytes.store(size, Ordering::Relaxed);
        self.l0_entries.store(entries, Ordering::Relaxed);
        self.l0_resets.store(resets, Ordering::Relaxed);
    }

    pub fn update_l1_stats(&self, size: u64, entries: u64, evictions: u64) {
        self.l1_size_bytes.store(size, Ordering::Relaxed);
        self.l1_entries.store(entries, Ordering::Relaxed);
        self.l1_evictions.store(evictions, Ordering::Relaxed);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn hits(&self, tier: CacheTier) -> u64 {
        match tier {
            CacheTier::L0 => self.l0_hits.load(Ordering::Relaxed),
            CacheTier::L1 => self.l1_hits.load(Ordering::Relaxed),
            CacheTier::L2 => self.l2_hits.load(Ordering::Relaxed),
            CacheTier::L3 => self.l3_hits.load(Ordering::Relaxed),
        }
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Mean lookup latency
    pub fn avg_latency(&self) -> Duration {
        let samples = self.latency_samples.load(Ordering::Relaxed);
        if samples == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(self.latency_total_us.load(Ordering::Relaxed) / samples)
    }

    /// Hits served from L0, L1 or L2 over all requests
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits(CacheTier::L0) + self.hits(CacheTier::L1) + self.hits(CacheTier::L2);
        ratio(hits, self.total_requests())
    }

    pub fn l0_hit_rate(&self) -> f64 {
        ratio(self.hits(CacheTier::L0), self.total_requests())
    }

    /// correct / (correct + incorrect)
    pub fn prediction_accuracy(&self) -> f64 {
        let correct = self.predictions_correct.load(Ordering::Relaxed);
        let incorrect = self.predictions_incorrect.load(Ordering::Relaxed);
        ratio(correct, correct + incorrect)
    }

    /// warm / (warm + cold)
    pub fn warm_hit_rate(&self) -> f64 {
        let warm = self.warm_hits.load(Ordering::Relaxed);
        let cold = self.cold_hits.load(Ordering::Relaxed);
        ratio(warm, warm + cold)
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            total_requests: self.total_requests(),
            l0_hits: self.hits(CacheTier::L0),
            l1_hits: self.hits(CacheTier::L1),
            l2_hits: self.hits(CacheTier::L2),
            l3_hits: self.hits(CacheTier::L3),
            misses: self.misses(),
            warm_hits: self.warm_hits.load(Ordering::Relaxed),
            cold_hits: self.cold_hits.load(Ordering::Relaxed),
            predictions_made: self.predictions_made.load(Ordering::Relaxed),
            predictions_correct: self.predictions_correct.load(Ordering::Relaxed),
            predictions_incorrect: self.predictions_incorrect.load(Ordering::Relaxed),
            keys_warmed: self.keys_warmed.load(Ordering::Relaxed),
            warm_failures: self.warm_failures.load(Ordering::Relaxed),
            l2_failures: self.l2_failures.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            avg_latency_us: self.avg_latency().as_secs_f64() * 1_000_000.0,
            l0_size_bytes: self.l0_size_bytes.load(Ordering::Relaxed),
            l0_entries: self.l0_entries.load(Ordering::Relaxed),
            l0_resets: self.l0_resets.load(Ordering::Relaxed),
            l1_size_bytes: self.l1_size_bytes.load(Ordering::Relaxed),
            l1_entries: self.l1_entries.load(Ordering::Relaxed),
            l1_evictions: self.l1_evictions.load(Ordering::Relaxed),
            hit_rate: self.hit_rate(),
            l0_hit_rate: self.l0_hit_rate(),
            prediction_accuracy: self.prediction_accuracy(),
            warm_hit_rate: self.warm_hit_rate(),
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        for counter in [
            &self.total_requests,
            &self.l0_hits,
            &self.l1_hits,
            &self.l2_hits,
            &self.l3_hits,
            &self.misses,
            &self.warm_hits,
            &self.cold_hits,
            &self.predictions_made,
            &self.predictions_correct,
            &self.predictions_incorrect,
            &self.keys_warmed,
            &self.warm_failures,
            &self.latency_total_us,
            &self.latency_samples,
            &self.l2_failures,
            &self.fetch_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Point-in-time view of the cache counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheMetricsSnapshot {
    pub total_requests: u64,

    // Tiers
    pub l0_hits: u64,
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub l3_hits: u64,
    pub misses: u64,

    // Prewarming
    pub warm_hits: u64,
    pub cold_hits: u64,
    pub predictions_made: u64,
    pub predictions_correct: u64,
    pub predictions_incorrect: u64,
    pub keys_warmed: u64,
    pub warm_failures: u64,

    // Degradation
    pub l2_failures: u64,
    pub fetch_failures: u64,

    pub avg_latency_us: f64,

    // Memory
    pub l0_size_bytes: u64,
    pub l0_entries: u64,
    pub l0_resets: u64,
    pub l1_size_bytes: u64,
    pub l1_entries: u64,
    pub l1_evictions: u64,

    // Derived
    pub hit_rate: f64,
    pub l0_hit_rate: f64,
    pub prediction_accuracy: f64,
    pub warm_hit_rate: f64,
}

/// Latency tracker helper
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    /// Start tracking latency
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

// =============================================================================
// Tests
// =============================================================================
