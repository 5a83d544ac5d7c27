//! Error types for PoolKV
//!
//! Three layers:
//! - [`PoolKvError`]: what callers of [`Engine`](crate::Engine) see
//! - [`OpenError`]: why a pool could not be opened (source of `InvalidArgument`)
//! - [`PoolError`]: failures inside the pool and index layers

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using PoolKvError
pub type Result<T> = std::result::Result<T, PoolKvError>;

/// Unified error type for PoolKV operations
#[derive(Debug, Error)]
pub enum PoolKvError {
    // -------------------------------------------------------------------------
    // Construction Errors
    // -------------------------------------------------------------------------
    /// Every open failure surfaces with the same message; the cause is the source.
    #[error("unable to open persistent pool")]
    InvalidArgument(#[source] OpenError),

    // -------------------------------------------------------------------------
    // Capacity Errors
    // -------------------------------------------------------------------------
    #[error("unable to put key: {}", String::from_utf8_lossy(.key))]
    OutOfSpace { key: Vec<u8> },

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("engine is closed")]
    Closed,

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Pool corrupted: {0}")]
    Corrupted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PoolKvError {
    /// True for construction failures (bad engine, path, size or pool)
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, PoolKvError::InvalidArgument(_))
    }

    /// True when a mutation failed because the pool is full
    pub fn is_out_of_space(&self) -> bool {
        matches!(self, PoolKvError::OutOfSpace { .. })
    }

    /// Translate an index-level failure, attributing space exhaustion to `key`
    pub(crate) fn from_pool(err: PoolError, key: &[u8]) -> Self {
        match err {
            PoolError::OutOfSpace => PoolKvError::OutOfSpace { key: key.to_vec() },
            PoolError::Corrupted(msg) => PoolKvError::Corrupted(msg),
            PoolError::Io(e) => PoolKvError::Io(e),
        }
    }
}

impl From<OpenError> for PoolKvError {
    fn from(err: OpenError) -> Self {
        PoolKvError::InvalidArgument(err)
    }
}

/// Reasons a pool could not be created or attached
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("unknown engine: {0}")]
    UnknownEngine(String),

    #[error("pool size {size} is below the minimum of {min} bytes")]
    SizeTooSmall { size: u64, min: u64 },

    #[error("pool size {size} exceeds the maximum of {max} bytes")]
    SizeTooLarge { size: u64, max: u64 },

    #[error("no pool at {0} and no size given to create one")]
    MissingPool(PathBuf),

    #[error("invalid pool: {0}")]
    InvalidPool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PoolError> for OpenError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Io(e) => OpenError::Io(e),
            PoolError::OutOfSpace => {
                OpenError::InvalidPool("pool too small for index metadata".to_string())
            }
            PoolError::Corrupted(msg) => OpenError::InvalidPool(msg),
        }
    }
}

/// Failures raised by the pool and the index variants
#[derive(Debug, Error)]
pub enum PoolError {
    /// Heap or undo log exhausted; the transaction was rolled back
    #[error("out of space")]
    OutOfSpace,

    #[error("corrupted: {0}")]
    Corrupted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
