//! Cache Configuration
//!
//! Loaded from YAML or built in code; every field has a default so partial
//! files are accepted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::entry::CachePriority;
use super::{DEFAULT_L0_CAPACITY, DEFAULT_L1_ENTRIES};
use crate::error::{Error, Result};
use crate::prediction::AnalyzerConfig;

/// Predictive cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Backing file of the mapped region
    pub l0_path: PathBuf,
    /// Size of the mapped region in bytes
    pub l0_capacity_bytes: usize,
    /// Maximum number of L1 entries
    pub l1_max_entries: usize,
    /// TTL for normal priority writes
    pub default_ttl_secs: u64,
    /// TTL for hot priority writes
    pub hot_ttl_secs: u64,
    /// TTL for cold priority writes
    pub cold_ttl_secs: u64,
    /// Minimum confidence for a prediction to be warmed
    pub prediction_threshold: f64,
    /// Run the background warming loop
    pub warming_enabled: bool,
    /// Interval between warming passes
    pub warming_interval_secs: u64,
    /// Predictions requested per user per warming pass
    pub warm_top_n: usize,
    /// Timeout applied to fetch callbacks
    pub fetch_timeout_ms: u64,
    /// Timeout applied to L2 calls
    pub l2_timeout_ms: u64,
    /// How long a warmed key may go unused before it counts as a wrong prediction
    pub prediction_validation_secs: u64,
    /// Pattern analyzer settings
    pub analyzer: AnalyzerConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l0_path: PathBuf::from("/tmp/predictive-cache/l0.bin"),
            l0_capacity_bytes: DEFAULT_L0_CAPACITY,
            l1_max_entries: DEFAULT_L1_ENTRIES,
            default_ttl_secs: 3600,
            hot_ttl_secs: 7200,
            cold_ttl_secs: 1800,
            prediction_threshold: 0.7,
            warming_enabled: true,
            warming_interval_secs: 60,
            warm_top_n: 5,
            fetch_timeout_ms: 5_000,
            l2_timeout_ms: 1_000,
            prediction_validation_secs: 600,
            analyzer: AnalyzerConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Default configuration with the mapped region at `path`
    pub fn with_l0_path(path: impl Into<PathBuf>) -> Self {
        Self {
            l0_path: path.into(),
            ..Default::default()
        }
    }

    /// Load and validate a YAML configuration file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse and validate YAML configuration text
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the cache cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.l0_capacity_bytes == 0 {
            return Err(Error::Config("l0_capacity_bytes must be positive".into()));
        }
        if self.l1_max_entries == 0 {
            return Err(Error::Config("l1_max_entries must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.prediction_threshold) {
            return Err(Error::Config(format!(
                "prediction_threshold must be within [0, 1], got {}",
                self.prediction_threshold
            )));
        }
        if self.warming_interval_secs == 0 {
            return Err(Error::Config(
                "warming_interval_secs must be positive".into(),
            ));
        }
        self.analyzer.validate()
    }

    /// TTL for a priority class
    pub fn ttl_for(&self, priority: CachePriority) -> Duration {
        let secs = match priority {
            CachePriority::Hot => self.hot_ttl_secs,
            CachePriority::Normal => self.default_ttl_secs,
            CachePriority::Cold => self.cold_ttl_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn warming_interval(&self) -> Duration {
        Duration::from_secs(self.warming_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn l2_timeout(&self) -> Duration {
        Duration::from_millis(self.l2_timeout_ms)
    }

    pub fn prediction_validation_window(&self) -> Duration {
        Duration::from_secs(self.prediction_validation_secs)
    }
}
