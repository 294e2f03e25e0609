//! Error types for the WarpGrid resource pool.

use std::time::Duration;

use thiserror::Error;

use crate::handle::HandleId;

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors that can occur while managing a resource pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool {0} is not initialized")]
    NotInitialized(String),

    #[error("pool {0} is shut down")]
    ShutDown(String),

    #[error("pool {pool} exhausted (waited {waited:?})")]
    Exhausted { pool: String, waited: Duration },

    #[error("handle {0} is not checked out")]
    NotBorrowed(HandleId),

    #[error("invalid pool configuration: {0}")]
    Config(String),

    #[error("failed to read pool configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse pool configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),

    #[error("allocator error: {0}")]
    Allocator(#[from] anyhow::Error),
}
