//! Sequence Pattern Analyzer
//!
//! Keeps a bounded access window per user, classifies the trailing events
//! after every append and turns the resulting patterns into ranked key
//! predictions. A global hour-of-day table contributes time-based candidates.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Timelike, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use super::detector::{self, Detection};
use super::types::{AccessEvent, AnalyzerConfig, BehaviorPattern, PatternKind, Prediction};

const MAX_CONFIDENCE: f64 = 0.95;
const FREQUENCY_BONUS: f64 = 0.02;
const RANK_DECAY: f64 = 0.9;
const TIME_CONFIDENCE_CAP: f64 = 0.9;

#[derive(Default)]
struct UserState {
    history: VecDeque<AccessEvent>,
    patterns: HashMap<PatternKind, BehaviorPattern>,
}

/// Per-user access pattern analyzer
pub struct PatternAnalyzer {
    config: AnalyzerConfig,
    users: DashMap<String, UserState>,
    /// UTC hour -> key -> accesses
    hourly: Mutex<HashMap<u32, HashMap<String, u64>>>,
    events_recorded: AtomicU64,
    detections: AtomicU64,
}

impl PatternAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            config,
            users: DashMap::new(),
            hourly: Mutex::new(HashMap::new()),
            events_recorded: AtomicU64::new(0),
            detections: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Record an access now
    pub fn record_access(&self, user_id: &str, key: &str) -> Option<PatternKind> {
        self.record_access_at(user_id, key, Utc::now())
    }

    /// Record an access at `timestamp` and re-evaluate the user's trailing window.
    ///
    /// Returns the kind detected by this access, if any. The append and the
    /// re-evaluation happen under the same per-user guard.
    pub fn record_access_at(
        &self,
        user_id: &str,
        key: &str,
        timestamp: DateTime<Utc>,
    ) -> Option<PatternKind> {
        self.events_recorded.fetch_add(1, Ordering::Relaxed);
        self.record_hourly(timestamp.hour(), key);

        let mut guard = self.users.entry(user_id.to_string()).or_default();
        let state = &mut *guard;

        state.history.push_back(AccessEvent {
            user_id: user_id.to_string(),
            key: key.to_string(),
            timestamp,
        });
        while state.history.len() > self.config.history_size {
            state.history.pop_front();
        }

        let skip = state
            .history
            .len()
            .saturating_sub(self.config.trailing_window);
        let trailing: Vec<&AccessEvent> = state.history.iter().skip(skip).collect();
        let detection = detector::detect(&trailing, &self.config)?;

        self.detections.fetch_add(1, Ordering::Relaxed);
        let kind = detection.kind;
        debug!(
            user = user_id,
            pattern = %kind,
            predicted = ?detection.predicted_keys,
            "Pattern detected"
        );
        upsert_pattern(&mut state.patterns, user_id, detection, timestamp);
        Some(kind)
    }

    /// Count `key` in the hour bucket, pruning the bucket when it doubles its cap
    fn record_hourly(&self, hour: u32, key: &str) {
        let cap = self.config.hourly_keys_per_bucket;
        let mut hourly = self.hourly.lock();
        let bucket = hourly.entry(hour).or_default();
        *bucket.entry(key.to_string()).or_insert(0) += 1;

        // Pruning in batches leaves new keys room to build up counts
        if bucket.len() >= cap.saturating_mul(2) {
            prune_bucket(bucket, cap);
        }
    }

    /// Top predictions for a user as of now
    pub fn predictions_for_user(&self, user_id: &str, top_n: usize) -> Vec<Prediction> {
        self.predictions_for_user_at(user_id, top_n, Utc::now())
    }

    /// Top predictions for a user as of `now`, best first.
    ///
    /// Active patterns are ranked by (frequency, confidence); the best
    /// `max_patterns` contribute their predicted keys, merged with the
    /// hour-of-day candidates for `now`. Duplicate keys keep their highest
    /// confidence.
    pub fn predictions_for_user_at(
        &self,
        user_id: &str,
        top_n: usize,
        now: DateTime<Utc>,
    ) -> Vec<Prediction> {
        if top_n == 0 {
            return Vec::new();
        }

        let mut merged: HashMap<String, f64> = HashMap::new();
        let mut offer = |key: &str, confidence: f64| {
            let confidence = confidence.clamp(0.0, 1.0);
            let slot = merged.entry(key.to_string()).or_insert(confidence);
            if confidence > *slot {
                *slot = confidence;
            }
        };

        if let Some(state) = self.users.get(user_id) {
            let window = self.config.activity_window();
            let mut active: Vec<&BehaviorPattern> = state
                .patterns
                .values()
                .filter(|p| p.is_active_at(now, window))
                .collect();
            active.sort_by(|a, b| {
                b.frequency
                    .cmp(&a.frequency)
                    .then(b.confidence.total_cmp(&a.confidence))
                    .then(a.kind.cmp(&b.kind))
            });

            for pattern in active.into_iter().take(self.config.max_patterns) {
                let mut weight = pattern.confidence;
                for key in &pattern.predicted_keys {
                    offer(key, weight);
                    weight *= RANK_DECAY;
                }
            }
        }

        for (key, count) in self.time_candidates(now.hour()) {
            offer(&key, (count as f64 / 10.0).min(TIME_CONFIDENCE_CAP));
        }

        let mut predictions: Vec<Prediction> = merged
            .into_iter()
            .map(|(key, confidence)| Prediction { key, confidence })
            .collect();
        predictions.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.key.cmp(&b.key))
        });
        predictions.truncate(top_n);
        predictions
    }

    fn time_candidates(&self, hour: u32) -> Vec<(String, u64)> {
        let hourly = self.hourly.lock();
        let Some(counts) = hourly.get(&hour) else {
            return Vec::new();
        };
        let mut candidates: Vec<(String, u64)> =
            counts.iter().map(|(k, c)| (k.clone(), *c)).collect();
        candidates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        candidates.truncate(self.config.time_candidates);
        candidates
    }

    /// All pattern records held for a user, active or not
    pub fn patterns_for_user(&self, user_id: &str) -> Vec<BehaviorPattern> {
        let mut patterns: Vec<BehaviorPattern> = self
            .users
            .get(user_id)
            .map(|state| state.patterns.values().cloned().collect())
            .unwrap_or_default();
        patterns.sort_by_key(|p| p.kind);
        patterns
    }

    /// Events currently retained for a user, oldest first
    pub fn history_for_user(&self, user_id: &str) -> Vec<AccessEvent> {
        self.users
            .get(user_id)
            .map(|state| state.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Users whose latest access falls within the activity window
    pub fn active_users_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let window = self.config.activity_window();
        let mut users: Vec<String> = self
            .users
            .iter()
            .filter(|entry| {
                entry.history.back().is_some_and(|last| {
                    (now - last.timestamp)
                        .to_std()
                        .map_or(true, |age| age <= window)
                })
            })
            .map(|entry| entry.key().clone())
            .collect();
        users.sort();
        users
    }

    pub fn active_users(&self) -> Vec<String> {
        self.active_users_at(Utc::now())
    }

    /// Get analyzer statistics
    pub fn stats(&self) -> AnalyzerStats {
        let patterns = self.users.iter().map(|e| e.patterns.len()).sum();
        AnalyzerStats {
            users: self.users.len(),
            patterns,
            events_recorded: self.events_recorded.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
        }
    }
}

impl Default for PatternAnalyzer {
    fn default() -> Self {
        Self::new(AnalyzerConfig::default())
    }
}

/// Keep the `keep` most frequent keys; ties go to key order
fn prune_bucket(bucket: &mut HashMap<String, u64>, keep: usize) {
    let mut counts: Vec<(String, u64)> = bucket.drain().collect();
    counts.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counts.truncate(keep);
    bucket.extend(counts);
}

fn upsert_pattern(
    patterns: &mut HashMap<PatternKind, BehaviorPattern>,
    user_id: &str,
    detection: Detection,
    now: DateTime<Utc>,
) {
    let pattern = patterns
        .entry(detection.kind)
        .or_insert_with(|| BehaviorPattern {
            pattern_id: BehaviorPattern::make_id(user_id, detection.kind),
            user_id: user_id.to_string(),
            kind: detection.kind,
            key_sequence: Vec::new(),
            frequency: 0,
            first_seen: now,
            last_seen: now,
            predicted_keys: Vec::new(),
            confidence: 0.0,
            avg_interval_secs: 0.0,
        });

    pattern.frequency = pattern.frequency.saturating_add(1);
    pattern.last_seen = now;
    pattern.key_sequence = detection.key_sequence;
    pattern.predicted_keys = detection.predicted_keys;
    pattern.avg_interval_secs = detection.avg_interval_secs;
    let bonus = FREQUENCY_BONUS * f64::from(pattern.frequency - 1);
    pattern.confidence = (detection.confidence + bonus).min(MAX_CONFIDENCE);
}

/// Analyzer statistics
#[derive(Debug, Clone, Default)]
pub struct AnalyzerStats {
    /// Users with recorded history
    pub users: usize,
    /// Pattern records across all users
    pub patterns: usize,
    pub events_recorded: u64,
    pub detections: u64,
}

// =============================================================================
// Tests
// =============================================================================
