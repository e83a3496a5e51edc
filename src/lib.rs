//! Predictive Cache - Multi-Tier Cache with Behavioral Prewarming
//!
//! Serves values from a memory-mapped region and an in-process LRU, falls
//! back to an optional external cache and a caller-supplied fetch, and uses
//! per-user access patterns to fetch likely next keys before they are asked
//! for.
//!
//! # Architecture
//!
//! ```text
//! get/set ─▶ PredictiveCache ─▶ L0 (mmap) → L1 (LRU) → L2 (remote) → fetch
//!                  │
//!                  ▼
//!           PatternAnalyzer ─▶ predictions ─▶ predict_and_warm / warming loop
//! ```
//!
//! # Example
//!
//! ```no_run
//! use predictive_cache::{CacheConfig, PredictiveCache};
//!
//! # async fn demo() -> predictive_cache::Result<()> {
//! let cache: PredictiveCache<String> =
//!     PredictiveCache::open(CacheConfig::with_l0_path("/tmp/demo/l0.bin"), None)?;
//!
//! cache.set("lead_1", "score=87".to_string()).await;
//! let (value, cached) = cache.get("lead_1", Some("agent-7")).await;
//! assert!(cached);
//! assert_eq!(value.as_deref(), Some("score=87"));
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Tiers, orchestrator, metrics and the warming loop
//! - [`prediction`] - Access pattern detection and key prediction
//! - [`monitoring`] - Health evaluation and Prometheus exposition
//! - [`error`] - Error types

pub mod cache;
pub mod error;
pub mod monitoring;
pub mod prediction;

// Re-export commonly used types
pub use cache::{
    CacheConfig, CacheMetricsSnapshot, CachePriority, CacheTier, InMemoryL2Client, L2Client,
    PredictiveCache, SetOptions,
};
pub use error::{Error, Result};
pub use prediction::{AnalyzerConfig, PatternAnalyzer, PatternKind, Prediction};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
