//! Index Module
//!
//! Key indexes living inside a persistent pool.
//!
//! ## Variants
//! - `blackhole`: accepts writes, stores nothing
//! - `hashmap`: linear hashing over a segmented bucket directory
//! - `btree`: sorted leaf chain with a volatile separator map
//!
//! The set of variants is closed: [`Index`] is a sum type selected once by
//! [`EngineKind`], and every variant implements [`KvIndex`].

mod blackhole;
mod btree;
mod hashmap;
mod record;

use std::fmt;
use std::ops::ControlFlow;
use std::path::Path;
use std::str::FromStr;

use crate::config::FlushMode;
use crate::error::{OpenError, PoolError};
use crate::pool::Pool;

pub use blackhole::Blackhole;
pub use btree::BTreeIndex;
pub use hashmap::HashMapIndex;

/// Visitor handed to [`KvIndex::scan`]; `Break` stops the scan
pub type Visitor<'v> = dyn FnMut(&[u8], &[u8]) -> ControlFlow<()> + 'v;

/// Contract shared by every index variant
pub trait KvIndex {
    /// Insert or overwrite
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), PoolError>;

    /// Exact-match lookup
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, PoolError>;

    fn exists(&self, key: &[u8]) -> Result<bool, PoolError>;

    /// Returns true if a record was removed
    fn remove(&mut self, key: &[u8]) -> Result<bool, PoolError>;

    /// Number of records stored
    fn count(&self) -> Result<u64, PoolError>;

    /// Visit every record once, in the variant's iteration order
    fn scan(&self, visit: &mut Visitor<'_>) -> Result<(), PoolError>;
}

// =============================================================================
// Engine Kind
// =============================================================================

/// Index variant selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Blackhole,
    HashMap,
    BTree,
}

impl EngineKind {
    /// Canonical engine name
    pub fn name(&self) -> &'static str {
        match self {
            EngineKind::Blackhole => "blackhole",
            EngineKind::HashMap => "hashmap",
            EngineKind::BTree => "btree",
        }
    }

    /// Layout name written into the pool header
    pub fn layout(&self) -> &'static str {
        match self {
            EngineKind::Blackhole => "poolkv.blackhole",
            EngineKind::HashMap => "poolkv.hashmap",
            EngineKind::BTree => "poolkv.btree",
        }
    }

    /// Whether iteration follows ascending key order
    pub fn is_ordered(&self) -> bool {
        matches!(self, EngineKind::BTree)
    }
}

impl FromStr for EngineKind {
    type Err = OpenError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "blackhole" => Ok(EngineKind::Blackhole),
            "hashmap" => Ok(EngineKind::HashMap),
            "btree" | "kvtree2" => Ok(EngineKind::BTree),
            other => Err(OpenError::UnknownEngine(other.to_string())),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Index
// =============================================================================

/// The active index of an open engine
pub enum Index {
    Blackhole(Blackhole),
    HashMap(HashMapIndex),
    BTree(BTreeIndex),
}

impl Index {
    /// Open the pool for `kind` (if it needs one) and attach its index
    pub fn open(
        kind: EngineKind,
        path: &Path,
        size: u64,
        flush_mode: FlushMode,
    ) -> Result<Self, OpenError> {
        match kind {
            EngineKind::Blackhole => Ok(Index::Blackhole(Blackhole)),
            EngineKind::HashMap => {
                let pool = Pool::open_or_create(path, size, kind.layout(), flush_mode)?;
                Ok(Index::HashMap(HashMapIndex::open(pool)?))
            }
            EngineKind::BTree => {
                let pool = Pool::open_or_create(path, size, kind.layout(), flush_mode)?;
                Ok(Index::BTree(BTreeIndex::open(pool)?))
            }
        }
    }

    pub fn kind(&self) -> EngineKind {
        match self {
            Index::Blackhole(_) => EngineKind::Blackhole,
            Index::HashMap(_) => EngineKind::HashMap,
            Index::BTree(_) => EngineKind::BTree,
        }
    }

    fn inner(&self) -> &dyn KvIndex {
        match self {
            Index::Blackhole(index) => index,
            Index::HashMap(index) => index,
            Index::BTree(index) => index,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn KvIndex {
        match self {
            Index::Blackhole(index) => index,
            Index::HashMap(index) => index,
            Index::BTree(index) => index,
        }
    }
}

impl KvIndex for Index {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), PoolError> {
        self.inner_mut().put(key, value)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, PoolError> {
        self.inner().get(key)
    }

    fn exists(&self, key: &[u8]) -> Result<bool, PoolError> {
        self.inner().exists(key)
    }

    fn remove(&mut self, key: &[u8]) -> Result<bool, PoolError> {
        self.inner_mut().remove(key)
    }

    fn count(&self) -> Result<u64, PoolError> {
        self.inner().count()
    }

    fn scan(&self, visit: &mut Visitor<'_>) -> Result<(), PoolError> {
        self.inner().scan(visit)
    }
}
