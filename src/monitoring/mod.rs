//! Monitoring
//!
//! Health evaluation and Prometheus exposition of cache metrics.

mod exporter;
mod health;

pub use exporter::PrometheusExporter;
pub use health::{
    evaluate_health, HealthCheck, HealthCheckResult, HealthResponse, HealthStatus,
    HealthThresholds,
};
