//! Classification rules for a user's trailing access window.
//!
//! Rules run in a fixed order and the first match wins:
//! sequential, repetitive, batch, targeted, exploratory.

use std::collections::HashMap;

use super::types::{AccessEvent, AnalyzerConfig, PatternKind};

const MAX_CONFIDENCE: f64 = 0.95;
const BATCH_CONFIDENCE: f64 = 0.6;
const TARGETED_CONFIDENCE: f64 = 0.5;
const EXPLORATORY_CONFIDENCE: f64 = 0.2;

/// Outcome of classifying one trailing window
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Detection {
    pub kind: PatternKind,
    /// Best first
    pub predicted_keys: Vec<String>,
    /// Base confidence before the frequency bonus
    pub confidence: f64,
    pub key_sequence: Vec<String>,
    pub avg_interval_secs: f64,
}

/// Split `lead_42` into (`lead_`, 42, 2)
pub fn split_numeric_suffix(key: &str) -> Option<(&str, u64, usize)> {
    let digits = key.bytes().rev().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let (prefix, number) = key.split_at(key.len() - digits);
    // Overlong suffixes fail to parse and simply do not classify
    number.parse().ok().map(|n| (prefix, n, digits))
}

/// Classify the trailing window, oldest event first
pub(crate) fn detect(trailing: &[&AccessEvent], config: &AnalyzerConfig) -> Option<Detection> {
    let keys: Vec<&str> = trailing.iter().map(|e| e.key.as_str()).collect();

    let (kind, predicted_keys, confidence) = detect_sequential(&keys, config)
        .or_else(|| detect_repetitive(&keys, config))
        .or_else(|| detect_batch(trailing, &keys, config))
        .or_else(|| detect_targeted(&keys))
        .or_else(|| detect_exploratory(&keys, config))?;

    Some(Detection {
        kind,
        predicted_keys,
        confidence,
        key_sequence: keys.iter().map(|k| k.to_string()).collect(),
        avg_interval_secs: average_interval_secs(trailing),
    })
}

type Rule = Option<(PatternKind, Vec<String>, f64)>;

fn detect_sequential(keys: &[&str], config: &AnalyzerConfig) -> Rule {
    let (last, rest) = keys.split_last()?;
    let (prefix, last_n, width) = split_numeric_suffix(last)?;

    let mut run = 1;
    let mut current = last_n;
    for key in rest.iter().rev() {
        match split_numeric_suffix(key) {
            Some((p, n, _)) if p == prefix && n < current && current - n <= 2 => {
                run += 1;
                current = n;
            }
            _ => break,
        }
    }

    if run < config.min_sequence_run {
        return None;
    }

    let predicted = (1..=2)
        .filter_map(|step| last_n.checked_add(step))
        .map(|n| format!("{}{:0width$}", prefix, n, width = width))
        .collect();
    let confidence = (0.5 + 0.1 * run as f64).min(MAX_CONFIDENCE);
    Some((PatternKind::Sequential, predicted, confidence))
}

fn detect_repetitive(keys: &[&str], config: &AnalyzerConfig) -> Rule {
    // key -> (count, last position)
    let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
    for (pos, key) in keys.iter().enumerate() {
        let slot = counts.entry(key).or_insert((0, pos));
        slot.0 += 1;
        slot.1 = pos;
    }

    let max_count = counts.values().map(|(c, _)| *c).max()?;
    if max_count < config.min_repetitions {
        return None;
    }

    let mut repeated: Vec<(&str, usize, usize)> = counts
        .into_iter()
        .filter(|(_, (c, _))| *c >= 2)
        .map(|(k, (c, pos))| (k, c, pos))
        .collect();
    // Most frequent first, most recent breaks ties
    repeated.sort_by(|a, b| b.1.cmp(&a.1).then(b.2.cmp(&a.2)));

    let predicted = repeated
        .into_iter()
        .take(3)
        .map(|(k, _, _)| k.to_string())
        .collect();
    let confidence = (0.5 + 0.5 * max_count as f64 / keys.len() as f64).min(MAX_CONFIDENCE);
    Some((PatternKind::Repetitive, predicted, confidence))
}

fn detect_batch(trailing: &[&AccessEvent], keys: &[&str], config: &AnalyzerConfig) -> Rule {
    let limit = chrono::Duration::from_std(config.batch_interval()).ok()?;

    // Length of the sub-second burst ending at the newest event
    let burst = 1 + trailing
        .windows(2)
        .rev()
        .take_while(|w| w[1].timestamp - w[0].timestamp < limit)
        .count();
    if burst < 3 {
        return None;
    }

    let mut predicted: Vec<String> = Vec::with_capacity(3);
    for key in keys.iter().rev() {
        if predicted.len() == 3 {
            break;
        }
        if !predicted.iter().any(|p| p == key) {
            predicted.push(key.to_string());
        }
    }
    Some((PatternKind::Batch, predicted, BATCH_CONFIDENCE))
}

fn detect_targeted(keys: &[&str]) -> Rule {
    match keys {
        [.., a, b] if a == b => Some((
            PatternKind::Targeted,
            vec![b.to_string()],
            TARGETED_CONFIDENCE,
        )),
        _ => None,
    }
}

fn detect_exploratory(keys: &[&str], config: &AnalyzerConfig) -> Rule {
    if keys.len() < config.min_exploration {
        return None;
    }
    let mut seen: Vec<&str> = keys.to_vec();
    seen.sort_unstable();
    seen.dedup();
    if seen.len() != keys.len() {
        return None;
    }
    Some((PatternKind::Exploratory, Vec::new(), EXPLORATORY_CONFIDENCE))
}

fn average_interval_secs(trailing: &[&AccessEvent]) -> f64 {
    if trailing.len() < 2 {
        return 0.0;
    }
    let total: f64 = trailing
        .windows(2)
        .map(|w| (w[1].timestamp - w[0].timestamp).num_milliseconds() as f64 / 1000.0)
        .sum();
    total / (trailing.len() - 1) as f64
}

// =============================================================================
// Tests
// =============================================================================
