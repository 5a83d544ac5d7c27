//! Engine Module
//!
//! The facade callers use: opens the pool for the selected index variant,
//! dispatches every data operation to it, and owns the open/closed lifecycle.
//!
//! ## Responsibilities
//! - Map an engine name to an index variant
//! - Serialize mutations against readers
//! - Translate index failures into [`PoolKvError`]
//! - Filter iteration by key pattern

use std::borrow::Cow;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{PoolKvError, Result};
use crate::index::{EngineKind, Index, KvIndex};
use crate::pattern::KeyPattern;

/// Lifecycle state; `Closed` is terminal
enum EngineState {
    Open(Index),
    Closed,
}

/// An open key-value store over one pool file
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader
///
/// - **Writes** (put/remove/close): take the state lock exclusively, so a
///   mutation runs to completion (commit or rollback) before anyone reads
/// - **Reads** (get/exists/count/each and the `*_like` queries): share the lock
///
/// Callbacks passed to the `each*` methods run with the read lock held and
/// must not call mutating methods on the same engine.
pub struct Engine {
    kind: EngineKind,
    path: PathBuf,
    state: RwLock<EngineState>,
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// Every failure is reported as [`PoolKvError::InvalidArgument`].
    pub fn open(config: Config) -> Result<Self> {
        let kind: EngineKind = config.engine.parse()?;
        let index = Index::open(kind, &config.path, config.pool_size, config.flush_mode)?;

        info!(engine = %kind, path = %config.path.display(), "engine opened");
        Ok(Self {
            kind,
            path: config.path,
            state: RwLock::new(EngineState::Open(index)),
        })
    }

    /// Open `path` with the named engine, creating a pool of `size` bytes if
    /// the file does not exist. `size == 0` only attaches an existing pool.
    pub fn create_or_open(engine: &str, path: impl AsRef<Path>, size: u64) -> Result<Self> {
        let config = Config::builder()
            .engine(engine)
            .path(path.as_ref())
            .pool_size(size)
            .build();
        Self::open(config)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn is_closed(&self) -> bool {
        matches!(*self.state.read(), EngineState::Closed)
    }

    /// Detach the index and release the pool. Further calls are no-ops.
    pub fn close(&self) {
        let previous = std::mem::replace(&mut *self.state.write(), EngineState::Closed);
        if let EngineState::Open(index) = previous {
            drop(index);
            info!(engine = %self.kind, path = %self.path.display(), "engine closed");
        }
    }

    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // =========================================================================
    // Data Operations
    // =========================================================================

    /// Insert or overwrite a value
    ///
    /// Fails with [`PoolKvError::OutOfSpace`] when the pool is full; the
    /// engine stays open and unchanged.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.with_index_mut(|index| index.put(key, value))?
            .map_err(|e| {
                let err = PoolKvError::from_pool(e, key);
                if err.is_out_of_space() {
                    warn!(key = %lossy(key), value_len = value.len(), "pool out of space");
                }
                err
            })
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.with_index(|index| index.get(key))?
            .map_err(|e| PoolKvError::from_pool(e, key))
    }

    /// Value as text, decoding invalid UTF-8 lossily
    pub fn get_string(&self, key: &[u8]) -> Result<Option<String>> {
        Ok(self
            .get(key)?
            .map(|value| String::from_utf8_lossy(&value).into_owned()))
    }

    pub fn exists(&self, key: &[u8]) -> Result<bool> {
        self.with_index(|index| index.exists(key))?
            .map_err(|e| PoolKvError::from_pool(e, key))
    }

    /// Returns true if the key was present
    pub fn remove(&self, key: &[u8]) -> Result<bool> {
        self.with_index_mut(|index| index.remove(key))?
            .map_err(|e| PoolKvError::from_pool(e, key))
    }

    pub fn count(&self) -> Result<u64> {
        self.with_index(|index| index.count())?
            .map_err(|e| PoolKvError::from_pool(e, &[]))
    }

    /// Visit every record once
    ///
    /// The ordered engine visits keys in ascending byte order; the hash
    /// engine in an unspecified but stable order.
    pub fn each<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]),
    {
        self.scan(&mut |key, value| {
            f(key, value);
            ControlFlow::Continue(())
        })
    }

    /// Like [`each`](Self::each), with key and value decoded as text
    pub fn each_string<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&str, &str),
    {
        self.each(|key, value| f(&lossy(key), &lossy(value)))
    }

    // =========================================================================
    // Pattern Queries
    // =========================================================================

    /// True if any key fully matches `pattern`; false for a malformed pattern
    pub fn exists_like(&self, pattern: &str) -> Result<bool> {
        let pattern = KeyPattern::compile(pattern);
        if !pattern.is_valid() {
            return Ok(false);
        }

        let mut found = false;
        self.scan(&mut |key, _| {
            if pattern.matches(key) {
                found = true;
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;
        Ok(found)
    }

    /// Number of keys fully matching `pattern`; 0 for a malformed pattern
    pub fn count_like(&self, pattern: &str) -> Result<u64> {
        let mut count = 0;
        self.each_like(pattern, |_, _| count += 1)?;
        Ok(count)
    }

    /// [`each`](Self::each) restricted to keys fully matching `pattern`
    pub fn each_like<F>(&self, pattern: &str, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]),
    {
        let pattern = KeyPattern::compile(pattern);
        if !pattern.is_valid() {
            return Ok(());
        }

        self.each(|key, value| {
            if pattern.matches(key) {
                f(key, value);
            }
        })
    }

    /// [`each_string`](Self::each_string) restricted to keys fully matching `pattern`
    pub fn each_string_like<F>(&self, pattern: &str, mut f: F) -> Result<()>
    where
        F: FnMut(&str, &str),
    {
        self.each_like(pattern, |key, value| f(&lossy(key), &lossy(value)))
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn scan(&self, visit: &mut dyn FnMut(&[u8], &[u8]) -> ControlFlow<()>) -> Result<()> {
        self.with_index(|index| index.scan(visit))?
            .map_err(|e| PoolKvError::from_pool(e, &[]))
    }

    fn with_index<T>(&self, f: impl FnOnce(&Index) -> T) -> Result<T> {
        match &*self.state.read() {
            EngineState::Open(index) => Ok(f(index)),
            EngineState::Closed => Err(PoolKvError::Closed),
        }
    }

    fn with_index_mut<T>(&self, f: impl FnOnce(&mut Index) -> T) -> Result<T> {
        match &mut *self.state.write() {
            EngineState::Open(index) => Ok(f(index)),
            EngineState::Closed => Err(PoolKvError::Closed),
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("kind", &self.kind)
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn lossy(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}
