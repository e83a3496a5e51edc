//! Pattern analyzer data types

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Shape of a user's recent access sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    /// Keys with increasing numeric suffixes
    Sequential,
    /// The same keys requested again and again
    Repetitive,
    /// Many distinct keys, no repeats
    Exploratory,
    /// Consecutive requests for one key
    Targeted,
    /// Bursts of sub-second accesses
    Batch,
}

impl PatternKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::Sequential => "sequential",
            PatternKind::Repetitive => "repetitive",
            PatternKind::Exploratory => "exploratory",
            PatternKind::Targeted => "targeted",
            PatternKind::Batch => "batch",
        }
    }
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded access
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEvent {
    pub user_id: String,
    pub key: String,
    pub timestamp: DateTime<Utc>,
}

/// A detected behavior pattern for one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorPattern {
    /// `<user>:<kind>`
    pub pattern_id: String,
    pub user_id: String,
    pub kind: PatternKind,
    /// Trailing keys that triggered the latest detection
    pub key_sequence: Vec<String>,
    /// Number of detections, starting at 1
    pub frequency: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Predicted next keys, best first
    pub predicted_keys: Vec<String>,
    /// 0.0 - 1.0
    pub confidence: f64,
    /// Mean gap between the triggering accesses
    pub avg_interval_secs: f64,
}

impl BehaviorPattern {
    /// Identifier shared by every detection of `kind` for `user_id`
    pub fn make_id(user_id: &str, kind: PatternKind) -> String {
        format!("{}:{}", user_id, kind)
    }

    /// Active patterns take part in predictions
    pub fn is_active_at(&self, now: DateTime<Utc>, activity_window: Duration) -> bool {
        match (now - self.last_seen).to_std() {
            Ok(age) => age <= activity_window,
            // last_seen in the future: clock skew, treat as fresh
            Err(_) => true,
        }
    }
}

/// A ranked key prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub key: String,
    /// 0.0 - 1.0
    pub confidence: f64,
}

/// Pattern analyzer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Events kept per user
    pub history_size: usize,
    /// Events inspected on each detection
    pub trailing_window: usize,
    /// Patterns older than this are ignored
    pub activity_window_secs: u64,
    /// Maximum gap between accesses of a batch
    pub batch_interval_ms: u64,
    /// Patterns consulted per prediction request
    pub max_patterns: usize,
    /// Keys needed for a sequential run
    pub min_sequence_run: usize,
    /// Occurrences needed for a repetitive pattern
    pub min_repetitions: usize,
    /// Distinct keys needed for an exploratory pattern
    pub min_exploration: usize,
    /// Hour-of-day candidates merged into predictions
    pub time_candidates: usize,
    /// Keys tracked per hour-of-day bucket
    pub hourly_keys_per_bucket: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            history_size: 100,
            trailing_window: 10,
            activity_window_secs: 30 * 60,
            batch_interval_ms: 1_000,
            max_patterns: 3,
            min_sequence_run: 3,
            min_repetitions: 3,
            min_exploration: 5,
            time_candidates: 5,
            hourly_keys_per_bucket: 1_000,
        }
    }
}

impl AnalyzerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.history_size == 0 {
            return Err(Error::Config(
                "analyzer.history_size must be positive".into(),
            ));
        }
        if self.trailing_window < 3 {
            return Err(Error::Config(
                "analyzer.trailing_window must be at least 3".into(),
            ));
        }
        if self.hourly_keys_per_bucket == 0 {
            return Err(Error::Config(
                "analyzer.hourly_keys_per_bucket must be positive".into(),
            ));
        }
        if self.min_sequence_run < 2 || self.min_repetitions < 2 {
            return Err(Error::Config(
                "analyzer run and repetition thresholds must be at least 2".into(),
            ));
        }
        Ok(())
    }

    pub fn activity_window(&self) -> Duration {
        Duration::from_secs(self.activity_window_secs)
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }
}
