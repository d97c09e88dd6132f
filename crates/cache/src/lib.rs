//! Lectern Cache Library
//!
//! Capacity-bounded record cache with high/low watermark eviction and
//! in-flight tracking, plus its configuration.

pub mod config;
pub mod error;
pub mod eviction;
pub mod record;
pub mod record_cache;

pub use config::CacheConfig;
pub use error::{CacheError, ConfigError};
pub use eviction::EvictionHints;
pub use record::{DatasetId, RecordKey, RecordState};
pub use record_cache::{CacheStats, RecordCache};
