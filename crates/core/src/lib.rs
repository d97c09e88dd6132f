//! Lectern core
//!
//! Prefetch scheduling and reader sessions for windowed record access.
//!
//! A [`ReaderSession`] takes scroll samples and the viewport center, derives
//! render, safety and background windows, and keeps a [`RecordCache`] filled
//! for them through a [`PrefetchScheduler`]. Record text comes from a
//! [`RecordLoader`] supplied by the host, either on background workers
//! ([`ReaderSession::start_workers`]) or on the calling thread
//! ([`ReaderSession::pump`]).

pub mod config;
pub mod diagnostics;
pub mod driver;
pub mod error;
pub mod loader;
pub mod prefetch;
pub mod session;

pub use config::{LecternConfig, PrefetchConfig, SessionSettings};
pub use diagnostics::{BatchHistory, BatchRecord, BatchStatus, DiagnosticsSnapshot};
pub use driver::FetchDriver;
pub use error::{SessionError, SessionResult};
pub use loader::{BatchResults, FetchError, RecordLoader};
pub use prefetch::{FetchBatch, PrefetchScheduler, SchedulerStats};
pub use session::ReaderSession;

pub use lectern_cache::{
    CacheConfig, CacheStats, ConfigError, DatasetId, EvictionHints, RecordCache, RecordKey,
    RecordState,
};
