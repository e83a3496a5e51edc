//! Error types for the predictive cache

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the predictive cache
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // L0 (Mapped Region) Errors
    // =========================================================================
    /// Backing file could not be created, sized or mapped
    #[error("Failed to initialize mapped region at {path}: {source}")]
    StorageInit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Operation on a region that has already been closed
    #[error("Mapped region is closed")]
    RegionClosed,

    /// A single record cannot fit in the region even after a reset
    #[error("Entry of {size} bytes exceeds region capacity of {capacity} bytes")]
    EntryTooLarge { size: usize, capacity: usize },

    /// Value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    // =========================================================================
    // Fetch Errors
    // =========================================================================
    /// Caller-supplied fetch callback failed
    #[error("Fetch failed for key {key}: {source}")]
    Fetch {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// Caller-supplied fetch callback did not finish in time
    #[error("Fetch for key {key} timed out after {timeout:?}")]
    FetchTimeout { key: String, timeout: Duration },

    // =========================================================================
    // External Tier Errors
    // =========================================================================
    /// External L2 client error
    #[error("L2 cache error: {0}")]
    L2(String),

    // =========================================================================
    // General Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl Error {
    /// True for errors raised by a fetch callback (failure or timeout)
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, Error::Fetch { .. } | Error::FetchTimeout { .. })
    }
}
