//! Access Pattern Prediction
//!
//! Online, rule-based classification of per-user access sequences into
//! behavior patterns, and ranked predictions of the keys a user is likely
//! to request next.
//!
//! ```text
//! record_access(user, key)
//!        │
//!        ▼
//! ┌──────────────┐   trailing window   ┌──────────────┐
//! │ user history │ ──────────────────▶ │   detector   │
//! │ (bounded)    │                     │ seq/rep/batch│
//! └──────────────┘                     └──────┬───────┘
//!        │ hour-of-day counts                 │ upsert
//!        ▼                                    ▼
//! ┌──────────────┐                     ┌──────────────┐
//! │ hourly table │ ─────────┬───────── │   patterns   │
//! └──────────────┘          ▼          └──────────────┘
//!                   predictions_for_user
//! ```

mod analyzer;
mod detector;
mod types;

pub use analyzer::{AnalyzerStats, PatternAnalyzer};
pub use types::{AccessEvent, AnalyzerConfig, BehaviorPattern, PatternKind, Prediction};
