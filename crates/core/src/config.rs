//! Reader configuration
//!
//! One TOML file configures every layer of the pipeline:
//!
//! ```toml
//! [cache]
//! high_water_mark = 6000
//! target_size = 5000
//!
//! [prefetch]
//! desktop_concurrency = 8
//! mobile_concurrency = 4
//! debounce_ms = 250
//!
//! [velocity]
//! row_height_px = 32.0
//!
//! [session]
//! total_rows = 31102
//! anchor_step = 8
//! ```
//!
//! Missing tables and keys keep their defaults. Environment variables
//! (`LECTERN_*`) override the file.

use lectern_cache::config::env_usize;
use lectern_cache::{CacheConfig, ConfigError};
use lectern_scheduler::{DeviceClass, VelocityConfig, WindowPolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const ENV_DESKTOP_CONCURRENCY: &str = "LECTERN_PREFETCH_DESKTOP_CONCURRENCY";
pub const ENV_MOBILE_CONCURRENCY: &str = "LECTERN_PREFETCH_MOBILE_CONCURRENCY";
pub const ENV_DEBOUNCE_MS: &str = "LECTERN_PREFETCH_DEBOUNCE_MS";
pub const ENV_MAX_ATTEMPTS: &str = "LECTERN_PREFETCH_MAX_ATTEMPTS";
pub const ENV_TOTAL_ROWS: &str = "LECTERN_TOTAL_ROWS";

/// Prefetch scheduling limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Batches in flight at once on desktop
    pub desktop_concurrency: usize,

    /// Batches in flight at once on mobile
    pub mobile_concurrency: usize,

    /// How many in-flight slots background batches may take. Defaults to
    /// half the concurrency cap (at least one).
    pub low_priority_slots: Option<usize>,

    /// Largest render or safety batch, in rows
    pub high_batch_size: usize,

    /// Largest background batch, in rows
    pub background_batch_size: usize,

    /// Quiet period before background work is queued
    pub debounce_ms: u64,

    /// Fetch attempts per record before it stays failed
    pub max_attempts: u32,

    /// Batches kept in the diagnostics history
    pub history_capacity: usize,

    /// Completed row ranges kept in scheduler stats
    pub recent_completed_capacity: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            desktop_concurrency: 8,
            mobile_concurrency: 4,
            low_priority_slots: None,
            high_batch_size: 150,
            background_batch_size: 300,
            debounce_ms: 250,
            max_attempts: 2,
            history_capacity: 20,
            recent_completed_capacity: 20,
        }
    }
}

impl PrefetchConfig {
    /// Concurrency cap for a device class (at least one)
    pub fn concurrency(&self, device: DeviceClass) -> usize {
        let cap = match device {
            DeviceClass::Desktop => self.desktop_concurrency,
            DeviceClass::Mobile => self.mobile_concurrency,
        };
        cap.max(1)
    }

    /// In-flight slots background batches may occupy on a device class
    pub fn low_slots(&self, device: DeviceClass) -> usize {
        let cap = self.concurrency(device);
        self.low_priority_slots
            .unwrap_or(cap / 2)
            .clamp(1, cap)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn with_concurrency(mut self, desktop: usize, mobile: usize) -> Self {
        self.desktop_concurrency = desktop;
        self.mobile_concurrency = mobile;
        self
    }

    pub fn with_low_priority_slots(mut self, slots: usize) -> Self {
        self.low_priority_slots = Some(slots);
        self
    }

    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }

    pub fn with_batch_sizes(mut self, high: usize, background: usize) -> Self {
        self.high_batch_size = high;
        self.background_batch_size = background;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.desktop_concurrency == 0 {
            return Err(ConfigError::InvalidValue("desktop_concurrency".to_string()));
        }
        if self.mobile_concurrency == 0 {
            return Err(ConfigError::InvalidValue("mobile_concurrency".to_string()));
        }
        if self.high_batch_size == 0 {
            return Err(ConfigError::InvalidValue("high_batch_size".to_string()));
        }
        if self.background_batch_size == 0 {
            return Err(ConfigError::InvalidValue("background_batch_size".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue("max_attempts".to_string()));
        }
        Ok(())
    }

    /// Overrides fields from `LECTERN_PREFETCH_*` environment variables.
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Some(value) = env_usize(ENV_DESKTOP_CONCURRENCY)? {
            self.desktop_concurrency = value;
        }
        if let Some(value) = env_usize(ENV_MOBILE_CONCURRENCY)? {
            self.mobile_concurrency = value;
        }
        if let Some(value) = env_usize(ENV_DEBOUNCE_MS)? {
            self.debounce_ms = value as u64;
        }
        if let Some(value) = env_usize(ENV_MAX_ATTEMPTS)? {
            self.max_attempts = u32::try_from(value)
                .map_err(|_| ConfigError::InvalidValue(ENV_MAX_ATTEMPTS.to_string()))?;
        }
        self.validate()?;
        Ok(self)
    }
}

/// Dataset shape and worker settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Rows in every dataset
    pub total_rows: u32,

    /// Center rows are rounded down to a multiple of this, so small
    /// scroll movements do not recompute windows
    pub anchor_step: u32,

    /// Fetch worker threads started by `start_workers`
    pub workers: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            total_rows: 31_102,
            anchor_step: 8,
            workers: 8,
        }
    }
}

/// Complete configuration for a reader session
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LecternConfig {
    pub session: SessionSettings,
    pub cache: CacheConfig,
    pub prefetch: PrefetchConfig,
    pub velocity: VelocityConfig,
    pub windows: WindowPolicy,
}

impl LecternConfig {
    /// Defaults with mobile cache watermarks
    pub fn for_device(device: DeviceClass) -> Self {
        Self {
            cache: CacheConfig::for_device(device),
            ..Self::default()
        }
    }

    pub fn with_total_rows(mut self, rows: u32) -> Self {
        self.session.total_rows = rows;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_prefetch(mut self, prefetch: PrefetchConfig) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        self.prefetch.validate()?;
        self.windows
            .validate()
            .map_err(|field| ConfigError::InvalidValue(format!("windows.{}", field)))?;
        if self.session.workers == 0 {
            return Err(ConfigError::InvalidValue("session.workers".to_string()));
        }
        Ok(())
    }

    /// Defaults, then the file at `path` if given, then the environment.
    ///
    /// Without a path, the platform default location is read if it exists.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = CacheConfig::default_config_path();
                if default_path.is_file() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env()
    }

    /// Overrides fields from `LECTERN_*` environment variables.
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        self.cache = self.cache.apply_env()?;
        self.prefetch = self.prefetch.apply_env()?;
        if let Some(rows) = env_usize(ENV_TOTAL_ROWS)? {
            self.session.total_rows = u32::try_from(rows)
                .map_err(|_| ConfigError::InvalidValue(ENV_TOTAL_ROWS.to_string()))?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path.as_ref(), self.to_toml()?)?;
        Ok(())
    }
}
