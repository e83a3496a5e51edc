//! Predictive Multi-Tier Cache
//!
//! Sub-millisecond reads from a memory-mapped region, backed by an in-process
//! LRU and an optional external cache, with behavioral prewarming.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                          PredictiveCache                                  │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  L0 (Mapped)        │ L1 (Memory)        │ L2 (Remote)     │ L3 (Source) │
//! │  ┌───────────────┐  │ ┌───────────────┐  │ ┌────────────┐  │ ┌─────────┐ │
//! │  │ MappedRegion  │  │ │ RecencyCache  │  │ │ L2Client   │  │ │ fetch   │ │
//! │  │ cursor+index  │  │ │ LRU + TTL     │  │ │ (external) │  │ │ callback│ │
//! │  └───────────────┘  │ └───────────────┘  │ └────────────┘  │ └─────────┘ │
//! │         ▲                   ▲                   │                │       │
//! │         └──── promote ──────┴──── promote ──────┘                │       │
//! │                                                                  │       │
//! │   PatternAnalyzer ──▶ predict_and_warm ──▶ fetch ────────────────┘       │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Design Principles
//!
//! - Each tier guards only its own state; no lock spans tiers
//! - L0 evicts by resetting the whole region when a record does not fit
//! - External tier failures degrade to the next tier and never fail a call
//! - Fetch failures on the read path reach the caller; during warming they
//!   are logged and skipped

mod codec;
mod config;
mod entry;
mod l0;
mod l1;
mod l2;
mod manager;
mod metrics;
mod warming;

pub use codec::{decode, encode};
pub use config::CacheConfig;
pub use entry::{CacheEntry, CachePriority, CacheTier};
pub use l0::{L0Stats, MappedRegion, Slot};
pub use l1::{L1Stats, RecencyCache};
pub use l2::{InMemoryL2Client, L2Client, L2ClientStats};
pub use manager::{PredictiveCache, SetOptions};
pub use metrics::{CacheMetrics, CacheMetricsSnapshot, LatencyTracker};
pub use warming::{run_warmer, spawn_warmer, warm_active_users};

/// Default L0 capacity (100MB)
pub const DEFAULT_L0_CAPACITY: usize = 100 * 1024 * 1024;

/// Default L1 capacity in entries
pub const DEFAULT_L1_ENTRIES: usize = 10_000;

// =============================================================================
// Tests
// =============================================================================
