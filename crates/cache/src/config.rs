//! Cache configuration: watermarks and where the configuration file lives.
//!
//! Configuration can be loaded from a TOML file, environment variables, or
//! created programmatically. Defaults depend on the device class: mobile
//! devices keep fewer records around.

use crate::error::ConfigError;
use lectern_scheduler::DeviceClass;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the high-water mark
pub const ENV_HIGH_WATER: &str = "LECTERN_CACHE_HIGH_WATER";

/// Environment variable overriding the target size
pub const ENV_TARGET: &str = "LECTERN_CACHE_TARGET";

/// Watermarks for the record cache.
///
/// When the cache holds more than `high_water_mark` records, eviction brings
/// it back down to `target_size`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Record count that triggers eviction
    pub high_water_mark: usize,
    /// Record count eviction reduces to
    pub target_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::for_device(DeviceClass::Desktop)
    }
}

impl CacheConfig {
    /// Creates a configuration with explicit watermarks.
    pub fn new(high_water_mark: usize, target_size: usize) -> Self {
        Self {
            high_water_mark,
            target_size,
        }
    }

    /// Default watermarks for a device class.
    ///
    /// Both leave room for the widest fast-scroll background window so a
    /// fling does not evict rows it is about to show.
    pub fn for_device(device: DeviceClass) -> Self {
        match device {
            DeviceClass::Desktop => Self::new(6_000, 5_000),
            DeviceClass::Mobile => Self::new(4_000, 3_400),
        }
    }

    pub fn with_high_water_mark(mut self, records: usize) -> Self {
        self.high_water_mark = records;
        self
    }

    pub fn with_target_size(mut self, records: usize) -> Self {
        self.target_size = records;
        self
    }

    /// Checks `1 <= target_size <= high_water_mark`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.high_water_mark == 0 {
            return Err(ConfigError::InvalidValue("high_water_mark".to_string()));
        }
        if self.target_size == 0 || self.target_size > self.high_water_mark {
            return Err(ConfigError::InvalidValue("target_size".to_string()));
        }
        Ok(())
    }

    /// Returns the default configuration file path for the current platform.
    ///
    /// - macOS: ~/Library/Application Support/lectern/lectern.toml
    /// - Linux: ~/.config/lectern/lectern.toml
    /// - Windows: %APPDATA%\lectern\lectern.toml
    pub fn default_config_path() -> PathBuf {
        match dirs::config_dir() {
            Some(dir) => dir.join("lectern").join("lectern.toml"),
            None => PathBuf::from("lectern.toml"),
        }
    }

    /// Loads configuration from environment variables on top of the defaults.
    ///
    /// Environment variables:
    /// - `LECTERN_CACHE_HIGH_WATER`: high-water mark in records
    /// - `LECTERN_CACHE_TARGET`: target size in records
    ///
    /// # Errors
    /// Returns an error if a variable is not a number or the result is
    /// inconsistent.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    /// Overrides fields from environment variables.
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Some(value) = env_usize(ENV_HIGH_WATER)? {
            self.high_water_mark = value;
        }
        if let Some(value) = env_usize(ENV_TARGET)? {
            self.target_size = value;
        }
        self.validate()?;
        Ok(self)
    }

    /// Loads configuration from a TOML file.
    ///
    /// Expected file format:
    /// ```toml
    /// high_water_mark = 6000
    /// target_size = 5000
    /// ```
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string. Missing keys keep defaults.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path.as_ref(), self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Reads an optional numeric environment variable.
pub fn env_usize(name: &str) -> Result<Option<usize>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
        Err(_) => Ok(None),
    }
}
