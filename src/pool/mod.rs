//! Persistent Pool Module
//!
//! A fixed-size memory-mapped file backing all index state.
//!
//! ## Responsibilities
//! - Create or attach a pool file of a fixed size
//! - Bounds-checked reads of the mapping
//! - Transactional writes through an undo log
//! - Block allocation with per-size-class free lists
//!
//! ## File Layout
//! ```text
//! ┌───────────────────────────────────────────────┐ 0
//! │ Header page (4 KiB)                           │
//! │   [0, 2048)    length + CRC + bincode header  │
//! │   [2048, ...)  root | heap top | free heads   │
//! ├───────────────────────────────────────────────┤ 4 KiB
//! │ Undo log (256 KiB)                            │
//! │   count (8) | entries ...                     │
//! ├───────────────────────────────────────────────┤ 260 KiB
//! │ Heap                                          │
//! │   [hdr (8)][payload] blocks, 32 B .. 512 MiB  │
//! └───────────────────────────────────────────────┘ pool size
//! ```

mod alloc;
mod header;
mod transaction;
mod undo;

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use tracing::{info, warn};

use crate::config::{FlushMode, MAX_POOL_SIZE, MIN_POOL_SIZE};
use crate::error::{OpenError, PoolError};

pub use header::PoolHeader;
pub use transaction::Transaction;

// =============================================================================
// Layout Constants
// =============================================================================

/// Size of the header page
pub(crate) const HEADER_PAGE: u64 = 4096;

/// Bytes reserved for the serialized header
pub(crate) const HEADER_CAPACITY: usize = 2048;

/// Mutable metadata words inside the header page
pub(crate) const META_ROOT: u64 = HEADER_CAPACITY as u64;
pub(crate) const META_HEAP_TOP: u64 = META_ROOT + 8;
pub(crate) const META_FREE_HEADS: u64 = META_HEAP_TOP + 8;

/// Undo log region
pub(crate) const UNDO_OFFSET: u64 = HEADER_PAGE;
pub(crate) const UNDO_SIZE: u64 = 256 * 1024;

/// First heap byte
pub(crate) const HEAP_START: u64 = UNDO_OFFSET + UNDO_SIZE;

/// Bounds-checked reads, shared by [`Pool`] and [`Transaction`]
pub trait PoolRead {
    /// Borrow `len` bytes at `offset`
    fn bytes(&self, offset: u64, len: u64) -> Result<&[u8], PoolError>;

    fn read_u64(&self, offset: u64) -> Result<u64, PoolError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.bytes(offset, 8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn read_u32(&self, offset: u64) -> Result<u32, PoolError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.bytes(offset, 4)?);
        Ok(u32::from_le_bytes(buf))
    }
}

/// A memory-mapped persistent pool
///
/// ## Concurrency
/// Reads take `&self`, transactions take `&mut self`; the owner decides how
/// to share it (the engine wraps it in an `RwLock`).
pub struct Pool {
    /// Pool file path
    path: PathBuf,

    /// Writable mapping of the whole file
    map: MmapMut,

    /// Validated header
    header: PoolHeader,

    /// When writes are msynced
    flush_mode: FlushMode,
}

impl Pool {
    /// Create a pool at `path`, or attach the one already there
    ///
    /// - No file, `size == 0`: `MissingPool`
    /// - No file, `size > 0`: create exactly `size` bytes (bounds checked)
    /// - File exists: attach as-is, `size` is not applied
    pub fn open_or_create(
        path: &Path,
        size: u64,
        layout: &str,
        flush_mode: FlushMode,
    ) -> Result<Self, OpenError> {
        match fs::metadata(path) {
            Ok(meta) => {
                if !meta.is_file() {
                    return Err(OpenError::InvalidPool(format!(
                        "{} is not a regular file",
                        path.display()
                    )));
                }
                if size != 0 && size != meta.len() {
                    warn!(
                        path = %path.display(),
                        requested = size,
                        actual = meta.len(),
                        "attaching existing pool, requested size ignored"
                    );
                }
                Self::attach(path, layout, flush_mode)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if size == 0 {
                    return Err(OpenError::MissingPool(path.to_path_buf()));
                }
                Self::create(path, size, layout, flush_mode)
            }
            Err(e) => Err(OpenError::Io(e)),
        }
    }

    /// Create a new pool file of exactly `size` bytes
    pub fn create(
        path: &Path,
        size: u64,
        layout: &str,
        flush_mode: FlushMode,
    ) -> Result<Self, OpenError> {
        if size < MIN_POOL_SIZE {
            return Err(OpenError::SizeTooSmall {
                size,
                min: MIN_POOL_SIZE,
            });
        }
        if size > MAX_POOL_SIZE || usize::try_from(size).is_err() {
            return Err(OpenError::SizeTooLarge {
                size,
                max: MAX_POOL_SIZE,
            });
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        match Self::format(file, path, size, layout, flush_mode) {
            Ok(pool) => {
                info!(path = %path.display(), size, layout, "created pool");
                Ok(pool)
            }
            Err(e) => {
                // Never leave a half-formatted file behind
                let _ = fs::remove_file(path);
                Err(e)
            }
        }
    }

    /// Attach an existing pool, rolling back any interrupted transaction
    pub fn attach(path: &Path, layout: &str, flush_mode: FlushMode) -> Result<Self, OpenError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let file_len = file.metadata()?.len();
        if file_len <= HEAP_START {
            return Err(OpenError::InvalidPool(format!(
                "file of {} bytes is too small to be a pool",
                file_len
            )));
        }

        // SAFETY: the pool file is owned exclusively by this process for the
        // lifetime of the mapping; concurrent writers are out of contract.
        let map = unsafe { MmapMut::map_mut(&file)? };

        let header = PoolHeader::decode(&map[..HEADER_CAPACITY])?;
        header.validate(file_len, layout)?;

        let mut pool = Self {
            path: path.to_path_buf(),
            map,
            header,
            flush_mode,
        };

        let replayed = undo::recover(&mut pool)?;
        if replayed > 0 {
            warn!(
                path = %path.display(),
                entries = replayed,
                "rolled back interrupted transaction"
            );
        }

        let heap_top = pool.heap_top()?;
        if heap_top < pool.header.heap_start || heap_top > pool.size() {
            return Err(OpenError::InvalidPool(format!(
                "heap top {} outside heap",
                heap_top
            )));
        }

        info!(path = %path.display(), size = file_len, layout, "attached pool");
        Ok(pool)
    }

    fn format(
        file: File,
        path: &Path,
        size: u64,
        layout: &str,
        flush_mode: FlushMode,
    ) -> Result<Self, OpenError> {
        file.set_len(size)?;

        // SAFETY: the file was just created by us with create_new
        let map = unsafe { MmapMut::map_mut(&file)? };

        let header = PoolHeader::new(layout, size);
        let mut pool = Self {
            path: path.to_path_buf(),
            map,
            header,
            flush_mode,
        };

        let encoded = pool.header.encode()?;
        pool.write_raw(0, &encoded)?;
        pool.write_raw(META_ROOT, &0u64.to_le_bytes())?;
        pool.write_raw(META_HEAP_TOP, &HEAP_START.to_le_bytes())?;
        // Free heads and the undo count are already zero in a fresh file
        pool.map.flush()?;

        Ok(pool)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Path of the pool file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total pool size in bytes
    pub fn size(&self) -> u64 {
        self.header.pool_size
    }

    /// Layout name recorded at creation
    pub fn layout(&self) -> &str {
        &self.header.layout
    }

    /// First heap byte
    pub fn heap_start(&self) -> u64 {
        self.header.heap_start
    }

    /// Offset of the index root object, 0 when none was set yet
    pub fn root(&self) -> Result<u64, PoolError> {
        self.read_u64(META_ROOT)
    }

    /// Bump pointer of the allocator
    pub fn heap_top(&self) -> Result<u64, PoolError> {
        self.read_u64(META_HEAP_TOP)
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Start a transaction; dropping it without `commit` rolls it back
    pub fn begin(&mut self) -> Transaction<'_> {
        Transaction::begin(self)
    }

    /// Run `f` inside a transaction
    ///
    /// Commits when `f` returns `Ok`, rolls back when it returns `Err`.
    pub fn transaction<T, F>(&mut self, f: F) -> Result<T, PoolError>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, PoolError>,
    {
        let mut tx = self.begin();
        let value = f(&mut tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Force every dirty page of the mapping to disk
    pub fn sync(&self) -> Result<(), PoolError> {
        self.map.flush()?;
        Ok(())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn range(&self, offset: u64, len: u64) -> Result<(usize, usize), PoolError> {
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= self.map.len() as u64)
            .ok_or_else(|| {
                PoolError::Corrupted(format!(
                    "range {}+{} outside pool of {} bytes",
                    offset,
                    len,
                    self.map.len()
                ))
            })?;
        Ok((offset as usize, end as usize))
    }

    /// Write without logging; callers own atomicity
    pub(crate) fn write_raw(&mut self, offset: u64, data: &[u8]) -> Result<(), PoolError> {
        let (start, end) = self.range(offset, data.len() as u64)?;
        self.map[start..end].copy_from_slice(data);
        Ok(())
    }

    /// msync a range when the flush mode asks for it
    pub(crate) fn persist(&self, offset: u64, len: u64) -> Result<(), PoolError> {
        if self.flush_mode == FlushMode::OnClose || len == 0 {
            return Ok(());
        }
        let (start, end) = self.range(offset, len)?;
        self.map.flush_range(start, end - start)?;
        Ok(())
    }
}

impl PoolRead for Pool {
    fn bytes(&self, offset: u64, len: u64) -> Result<&[u8], PoolError> {
        let (start, end) = self.range(offset, len)?;
        Ok(&self.map[start..end])
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if let Err(e) = self.map.flush() {
            warn!(path = %self.path.display(), error = %e, "failed to flush pool on close");
        }
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("path", &self.path)
            .field("header", &self.header)
            .field("flush_mode", &self.flush_mode)
            .finish()
    }
}
