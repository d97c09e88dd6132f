//! Error types for the record cache and its configuration

use std::io;
use thiserror::Error;

/// Cache invariant violations
#[derive(Debug, Error)]
pub enum CacheError {
    /// Eviction finished with more evictable entries than the ceiling allows.
    /// Only loading entries may push the cache past its high-water mark.
    #[error("cache holds {evictable} evictable records after eviction, ceiling is {ceiling}")]
    CapacityExceeded { evictable: usize, ceiling: usize },
}

/// Errors that can occur while loading or saving configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid value for a configuration key
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),

    /// I/O error reading or writing a configuration file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The file is not valid TOML for this configuration
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}
