//! Pool transactions
//!
//! All index mutations go through a [`Transaction`]:
//! - `write*` logs the old bytes, then modifies the mapping
//! - `write_fresh` skips logging for blocks allocated in this transaction
//! - `alloc`/`free` update allocator metadata transactionally
//! - `commit` flushes dirty ranges and clears the log
//! - dropping an uncommitted transaction rolls everything back

use std::collections::HashSet;

use tracing::error;

use crate::error::PoolError;

use super::alloc::{self, BLOCK_HEADER};
use super::undo;
use super::{Pool, PoolRead, META_HEAP_TOP, META_ROOT};

/// An atomic group of pool mutations
pub struct Transaction<'a> {
    pool: &'a mut Pool,

    /// Next free position in the undo log
    log_end: u64,

    /// Entries appended so far
    log_entries: u64,

    /// Ranges already logged in this transaction
    logged: HashSet<(u64, u64)>,

    /// Blocks freed in this transaction; their payload is still live on rollback
    freed: HashSet<u64>,

    /// Ranges to flush on commit
    dirty: Vec<(u64, u64)>,

    /// False once committed or rolled back
    active: bool,
}

impl<'a> Transaction<'a> {
    pub(super) fn begin(pool: &'a mut Pool) -> Self {
        Self {
            pool,
            log_end: undo::LOG_ENTRIES,
            log_entries: 0,
            logged: HashSet::new(),
            freed: HashSet::new(),
            dirty: Vec::new(),
            active: true,
        }
    }

    pub fn root(&self) -> Result<u64, PoolError> {
        self.pool.root()
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Point the pool root at `offset`
    pub fn set_root(&mut self, offset: u64) -> Result<(), PoolError> {
        self.write_u64(META_ROOT, offset)
    }

    pub fn write_u64(&mut self, offset: u64, value: u64) -> Result<(), PoolError> {
        self.write(offset, &value.to_le_bytes())
    }

    /// Logged write of existing pool bytes
    pub fn write(&mut self, offset: u64, data: &[u8]) -> Result<(), PoolError> {
        self.snapshot(offset, data.len() as u64)?;
        self.write_fresh(offset, data)
    }

    /// Unlogged write into a block allocated by this transaction.
    /// A block recycled from an earlier `free` in the same transaction has
    /// its whole payload logged by `alloc`, so this stays safe for it too.
    pub fn write_fresh(&mut self, offset: u64, data: &[u8]) -> Result<(), PoolError> {
        self.pool.write_raw(offset, data)?;
        self.dirty.push((offset, data.len() as u64));
        Ok(())
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Allocate a block with room for `size` payload bytes.
    /// Returns the payload offset; its contents are unspecified.
    pub fn alloc(&mut self, size: u64) -> Result<u64, PoolError> {
        let class = alloc::class_for(size).ok_or(PoolError::OutOfSpace)?;
        let head_at = alloc::free_head_offset(class);
        let head = self.read_u64(head_at)?;

        let block = if head != 0 {
            let next = self.read_u64(head + BLOCK_HEADER)?;
            if self.freed.remove(&head) {
                // Still live if we roll back, so keep all of its payload
                self.snapshot(head + BLOCK_HEADER, alloc::block_size(class) - BLOCK_HEADER)?;
            } else {
                // The free link is about to be overwritten by the caller's payload
                self.snapshot(head + BLOCK_HEADER, 8)?;
            }
            self.write_u64(head_at, next)?;
            self.write_u64(head, alloc::encode_header(class, true))?;
            head
        } else {
            let top = self.read_u64(META_HEAP_TOP)?;
            let end = top
                .checked_add(alloc::block_size(class))
                .filter(|&end| end <= self.pool.size())
                .ok_or(PoolError::OutOfSpace)?;
            self.write_u64(META_HEAP_TOP, end)?;
            self.write_fresh(top, &alloc::encode_header(class, true).to_le_bytes())?;
            top
        };

        Ok(block + BLOCK_HEADER)
    }

    /// Return the block holding payload `offset` to its free list
    pub fn free(&mut self, offset: u64) -> Result<(), PoolError> {
        let block = offset
            .checked_sub(BLOCK_HEADER)
            .filter(|&b| b >= self.pool.heap_start())
            .ok_or_else(|| PoolError::Corrupted(format!("free of non-heap offset {}", offset)))?;

        let (class, allocated) = alloc::decode_header(block, self.read_u64(block)?)?;
        if !allocated {
            return Err(PoolError::Corrupted(format!(
                "double free of block {}",
                block
            )));
        }

        let head_at = alloc::free_head_offset(class);
        let head = self.read_u64(head_at)?;
        self.write_u64(block + BLOCK_HEADER, head)?;
        self.write_u64(block, alloc::encode_header(class, false))?;
        self.write_u64(head_at, block)?;
        self.freed.insert(block);
        Ok(())
    }

    // =========================================================================
    // Completion
    // =========================================================================

    /// Make every write durable and clear the undo log
    pub fn commit(mut self) -> Result<(), PoolError> {
        // On error `self` drops while still active and rolls back
        for &(offset, len) in &self.dirty {
            self.pool.persist(offset, len)?;
        }
        undo::clear(self.pool)?;
        self.active = false;
        Ok(())
    }

    /// Discard every write made so far
    pub fn abort(mut self) -> Result<(), PoolError> {
        self.rollback()
    }

    fn rollback(&mut self) -> Result<(), PoolError> {
        self.active = false;
        undo::recover(self.pool)?;
        Ok(())
    }

    fn snapshot(&mut self, offset: u64, len: u64) -> Result<(), PoolError> {
        if !self.logged.insert((offset, len)) {
            return Ok(());
        }
        self.log_end = undo::append(self.pool, self.log_end, self.log_entries, offset, len)?;
        self.log_entries += 1;
        Ok(())
    }
}

/// Reads observe this transaction's uncommitted writes
impl PoolRead for Transaction<'_> {
    fn bytes(&self, offset: u64, len: u64) -> Result<&[u8], PoolError> {
        self.pool.bytes(offset, len)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.active {
            if let Err(e) = self.rollback() {
                error!(path = %self.pool.path().display(), error = %e, "transaction rollback failed");
            }
        }
    }
}
