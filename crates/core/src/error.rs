//! Session errors

use lectern_cache::ConfigError;
use std::io;

/// Errors from setting up or running a reader session
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to start fetch workers: {0}")]
    WorkerSpawn(#[from] io::Error),
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;
