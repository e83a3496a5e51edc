//! Prometheus exposition of cache metrics
//!
//! Snapshot values are published as gauges in a private registry so several
//! caches (or tests) in one process never collide on metric names.

use prometheus::core::Collector;
use prometheus::{Encoder, Gauge, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::cache::CacheMetricsSnapshot;
use crate::error::{Error, Result};

const NAMESPACE: &str = "predictive_cache";

/// Publishes [`CacheMetricsSnapshot`]s in the Prometheus text format
pub struct PrometheusExporter {
    registry: Registry,
    requests: IntGauge,
    hits: IntGaugeVec,
    misses: IntGauge,
    hit_kind: IntGaugeVec,
    predictions: IntGaugeVec,
    failures: IntGaugeVec,
    memory_bytes: IntGaugeVec,
    entries: IntGaugeVec,
    l0_resets: IntGauge,
    avg_latency_us: Gauge,
    hit_rate: Gauge,
    l0_hit_rate: Gauge,
    prediction_accuracy: Gauge,
    warm_hit_rate: Gauge,
}

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(NAMESPACE)
}

fn prom_err(e: prometheus::Error) -> Error {
    Error::Internal(format!("prometheus: {}", e))
}

fn int_gauge(name: &str, help: &str) -> Result<IntGauge> {
    IntGauge::with_opts(opts(name, help)).map_err(prom_err)
}

fn int_gauge_vec(name: &str, help: &str, label: &str) -> Result<IntGaugeVec> {
    IntGaugeVec::new(opts(name, help), &[label]).map_err(prom_err)
}

fn gauge(name: &str, help: &str) -> Result<Gauge> {
    Gauge::with_opts(opts(name, help)).map_err(prom_err)
}

fn register<C: Collector + Clone + 'static>(registry: &Registry, collector: &C) -> Result<()> {
    registry.register(Box::new(collector.clone())).map_err(prom_err)
}

impl PrometheusExporter {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests = int_gauge("requests", "Lookups served")?;
        let hits = int_gauge_vec("hits", "Hits by tier", "tier")?;
        let misses = int_gauge("misses", "Lookups missing every tier")?;
        let hit_kind = int_gauge_vec("hit_kind", "Hits on prewarmed vs ordinary entries", "kind")?;
        let predictions = int_gauge_vec("predictions", "Predictions by outcome", "outcome")?;
        let failures = int_gauge_vec("failures", "Degraded calls by source", "source")?;
        let memory_bytes = int_gauge_vec("memory_bytes", "Approximate memory by tier", "tier")?;
        let entries = int_gauge_vec("entries", "Entries by tier", "tier")?;
        let l0_resets = int_gauge("l0_resets", "Reset-on-overflow evictions in L0")?;
        let avg_latency_us = gauge("avg_latency_us", "Mean lookup latency in microseconds")?;
        let hit_rate = gauge("hit_rate", "Hits in L0, L1 or L2 over requests")?;
        let l0_hit_rate = gauge("l0_hit_rate", "L0 hits over requests")?;
        let prediction_accuracy = gauge("prediction_accuracy", "Correct over validated")?;
        let warm_hit_rate = gauge("warm_hit_rate", "Warm hits over hits on tracked entries")?;

        register(&registry, &requests)?;
        register(&registry, &hits)?;
        register(&registry, &misses)?;
        register(&registry, &hit_kind)?;
        register(&registry, &predictions)?;
        register(&registry, &failures)?;
        register(&registry, &memory_bytes)?;
        register(&registry, &entries)?;
        register(&registry, &l0_resets)?;
        register(&registry, &avg_latency_us)?;
        register(&registry, &hit_rate)?;
        register(&registry, &l0_hit_rate)?;
        register(&registry, &prediction_accuracy)?;
        register(&registry, &warm_hit_rate)?;

        Ok(Self {
            registry,
            requests,
            hits,
            misses,
            hit_kind,
            predictions,
            failures,
            memory_bytes,
            entries,
            l0_resets,
            avg_latency_us,
            hit_rate,
            l0_hit_rate,
            prediction_accuracy,
            warm_hit_rate,
        })
    }

    /// Copy a snapshot into the gauges
    pub fn update(&self, s: &CacheMetricsSnapshot) {
        self.requests.set(to_i64(s.total_requests));
        set_labeled(&self.hits, "l0", s.l0_hits);
        set_labeled(&self.hits, "l1", s.l1_hits);
        set_labeled(&self.hits, "l2", s.l2_hits);
        set_labeled(&self.hits, "l3", s.l3_hits);
        self.misses.set(to_i64(s.misses));

        set_labeled(&self.hit_kind, "warm", s.warm_hits);
        set_labeled(&self.hit_kind, "cold", s.cold_hits);

        set_labeled(&self.predictions, "made", s.predictions_made);
        set_labeled(&self.predictions, "correct", s.predictions_correct);
        set_labeled(&self.predictions, "incorrect", s.predictions_incorrect);
        set_labeled(&self.predictions, "warmed", s.keys_warmed);

        set_labeled(&self.failures, "l2", s.l2_failures);
        set_labeled(&self.failures, "fetch", s.fetch_failures);
        set_labeled(&self.failures, "warm", s.warm_failures);

        set_labeled(&self.memory_bytes, "l0", s.l0_size_bytes);
        set_labeled(&self.memory_bytes, "l1", s.l1_size_bytes);
        set_labeled(&self.entries, "l0", s.l0_entries);
        set_labeled(&self.entries, "l1", s.l1_entries);
        self.l0_resets.set(to_i64(s.l0_resets));

        self.avg_latency_us.set(s.avg_latency_us);
        self.hit_rate.set(s.hit_rate);
        self.l0_hit_rate.set(s.l0_hit_rate);
        self.prediction_accuracy.set(s.prediction_accuracy);
        self.warm_hit_rate.set(s.warm_hit_rate);
    }

    /// Render the registry in the text exposition format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(prom_err)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }

    /// Content type for [`render`](Self::render) output
    pub fn content_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn set_labeled(gauges: &IntGaugeVec, label: &str, value: u64) {
    gauges.with_label_values(&[label]).set(to_i64(value));
}

// =============================================================================
// Tests
// =============================================================================
