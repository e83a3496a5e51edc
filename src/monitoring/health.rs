//! Health Checks
//!
//! Derives a health report from a metrics snapshot and the L0 region state.
//! The L2 check looks at failures since the previous evaluation, so a
//! transient outage clears once calls succeed again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::cache::CacheMetricsSnapshot;

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Service is healthy
    Healthy,
    /// Service is degraded but operational
    Degraded,
    /// Service is unhealthy
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy or degraded (operational)
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    pub fn is_healthy(&self) -> bool {
        *self == HealthStatus::Healthy
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "Healthy"),
            HealthStatus::Degraded => write!(f, "Degraded"),
            HealthStatus::Unhealthy => write!(f, "Unhealthy"),
        }
    }
}

/// Health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Check name
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
}

impl HealthCheckResult {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
        }
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Worst status among the checks
    pub status: HealthStatus,
    pub checks: Vec<HealthCheckResult>,
    pub version: String,
    pub uptime_seconds: u64,
}

impl HealthResponse {
    pub fn new(checks: Vec<HealthCheckResult>, uptime: Duration) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        Self {
            status,
            checks,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime.as_secs(),
        }
    }
}

/// Limits below which a check reports degraded
#[derive(Debug, Clone)]
pub struct HealthThresholds {
    /// Requests needed before the hit rate is judged
    pub min_requests: u64,
    pub min_hit_rate: f64,
    /// Validated predictions needed before accuracy is judged
    pub min_validated_predictions: u64,
    pub min_prediction_accuracy: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            min_requests: 100,
            min_hit_rate: 0.5,
            min_validated_predictions: 20,
            min_prediction_accuracy: 0.3,
        }
    }
}

/// Health check manager
pub struct HealthCheck {
    /// Start time
    start_time: Instant,
    thresholds: HealthThresholds,
    /// Cumulative L2 failures seen by the previous evaluation
    last_l2_failures: AtomicU64,
}

impl HealthCheck {
    pub fn new(thresholds: HealthThresholds) -> Self {
        Self {
            start_time: Instant::now(),
            thresholds,
            last_l2_failures: AtomicU64::new(0),
        }
    }

    /// Get uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    /// Run all health checks against a fresh snapshot
    pub fn check_all(&self, snapshot: &CacheMetricsSnapshot, l0_open: bool) -> HealthResponse {
        let previous = self
            .last_l2_failures
            .swap(snapshot.l2_failures, Ordering::Relaxed);
        // A counter reset reads as no new failures
        let new_l2_failures = snapshot.l2_failures.saturating_sub(previous);

        evaluate_health(
            snapshot,
            l0_open,
            new_l2_failures,
            &self.thresholds,
            self.uptime(),
        )
    }
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self::new(HealthThresholds::default())
    }
}

/// Evaluate cache health from a snapshot.
///
/// `new_l2_failures` is the number of failed L2 calls in the window being
/// judged; the snapshot's cumulative counter is not consulted.
pub fn evaluate_health(
    snapshot: &CacheMetricsSnapshot,
    l0_open: bool,
    new_l2_failures: u64,
    thresholds: &HealthThresholds,
    uptime: Duration,
) -> HealthResponse {
    let mut checks = Vec::with_capacity(4);

    checks.push(if l0_open {
        HealthCheckResult::healthy("l0_region")
    } else {
        HealthCheckResult::unhealthy("l0_region", "mapped region is closed")
    });

    checks.push(if new_l2_failures == 0 {
        HealthCheckResult::healthy("l2_tier")
    } else {
        HealthCheckResult::degraded(
            "l2_tier",
            format!("{} failed L2 calls since last check", new_l2_failures),
        )
    });

    checks.push(
        if snapshot.total_requests >= thresholds.min_requests
            && snapshot.hit_rate < thresholds.min_hit_rate
        {
            HealthCheckResult::degraded(
                "hit_rate",
                format!(
                    "hit rate {:.2} below {:.2}",
                    snapshot.hit_rate, thresholds.min_hit_rate
                ),
            )
        } else {
            HealthCheckResult::healthy("hit_rate")
        },
    );

    let validated = snapshot.predictions_correct + snapshot.predictions_incorrect;
    checks.push(
        if validated >= thresholds.min_validated_predictions
            && snapshot.prediction_accuracy < thresholds.min_prediction_accuracy
        {
            HealthCheckResult::degraded(
                "prediction_accuracy",
                format!(
                    "prediction accuracy {:.2} below {:.2}",
                    snapshot.prediction_accuracy, thresholds.min_prediction_accuracy
                ),
            )
        } else {
            HealthCheckResult::healthy("prediction_accuracy")
        },
    );

    HealthResponse::new(checks, uptime)
}

// =============================================================================
// Tests
// =============================================================================
