//! Configuration for PoolKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

/// Smallest pool that can be created (8 MiB)
pub const MIN_POOL_SIZE: u64 = 8 * 1024 * 1024;

/// Largest pool that can be created (1 TiB)
pub const MAX_POOL_SIZE: u64 = 1024 * 1024 * 1024 * 1024;

/// Size used when none is configured
pub const DEFAULT_POOL_SIZE: u64 = MIN_POOL_SIZE;

/// Main configuration for a PoolKV engine instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Engine Selection
    // -------------------------------------------------------------------------
    /// Index variant name: "blackhole", "hashmap", "btree" (alias "kvtree2")
    pub engine: String,

    // -------------------------------------------------------------------------
    // Pool Configuration
    // -------------------------------------------------------------------------
    /// Pool file backing the engine (ignored by "blackhole")
    pub path: PathBuf,

    /// Size of a newly created pool in bytes.
    /// 0 means "attach an existing pool, never create".
    pub pool_size: u64,

    /// When pool writes are forced to stable storage
    pub flush_mode: FlushMode,
}

/// Flush strategy for pool mutations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// msync undo entries before data changes and data before commit (safest, slowest)
    EveryCommit,

    /// Leave dirty pages to the kernel and msync once on close.
    /// Transactions stay atomic against process crashes, not power loss.
    OnClose,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: "btree".to_string(),
            path: PathBuf::from("./poolkv.pool"),
            pool_size: DEFAULT_POOL_SIZE,
            flush_mode: FlushMode::EveryCommit,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the index variant by name
    pub fn engine(mut self, name: impl Into<String>) -> Self {
        self.config.engine = name.into();
        self
    }

    /// Set the pool file path
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Set the pool size (in bytes), 0 to only attach an existing pool
    pub fn pool_size(mut self, size: u64) -> Self {
        self.config.pool_size = size;
        self
    }

    /// Set the flush mode
    pub fn flush_mode(mut self, mode: FlushMode) -> Self {
        self.config.flush_mode = mode;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
