//! Hash index
//!
//! Linear hashing: the table grows one bucket at a time, splitting the bucket
//! at `split` whenever the load exceeds [`MAX_LOAD`]. Buckets live in a
//! segmented directory so growth never moves existing buckets.
//!
//! ## Root Layout
//! ```text
//! ┌───────────┬───────────┬───────────┬───────────┬──────────────────────┐
//! │ Magic (8) │ Count (8) │ Level (8) │ Split (8) │ Segments (32 x 8)    │
//! └───────────┴───────────┴───────────┴───────────┴──────────────────────┘
//! ```
//! Segment 0 holds `INITIAL_BUCKETS` slots, segment k >= 1 holds
//! `INITIAL_BUCKETS << (k - 1)`. A slot is the offset of the first entry.
//!
//! ## Entry Layout
//! ```text
//! ┌──────────┬──────────┬──────────────────────────────┐
//! │ Next (8) │ Hash (8) │ Record (see record.rs)       │
//! └──────────┴──────────┴──────────────────────────────┘
//! ```

use std::ops::ControlFlow;

use tracing::debug;

use crate::error::PoolError;
use crate::pool::{Pool, PoolRead, Transaction};

use super::record;
use super::{KvIndex, Visitor};

const ROOT_MAGIC: u64 = u64::from_le_bytes(*b"KVHASH01");

/// Buckets before the first split
const INITIAL_BUCKETS: u64 = 1024;

/// Directory capacity
const MAX_SEGMENTS: u64 = 32;

/// Average chain length that triggers a split
const MAX_LOAD: u64 = 2;

const MAGIC_AT: u64 = 0;
const COUNT_AT: u64 = 8;
const LEVEL_AT: u64 = 16;
const SPLIT_AT: u64 = 24;
const SEGMENTS_AT: u64 = 32;
const ROOT_SIZE: u64 = SEGMENTS_AT + MAX_SEGMENTS * 8;

const NEXT_AT: u64 = 0;
const HASH_AT: u64 = 8;
const RECORD_AT: u64 = 16;

/// Persistent hash index
pub struct HashMapIndex {
    pool: Pool,

    /// Offset of the root object
    root: u64,
}

/// Where a key lives, or would be linked
struct Location {
    hash: u64,
    /// Bucket slot of the key's chain
    slot: u64,
    /// Word pointing at `entry` (the slot or the previous entry's next)
    link: u64,
    entry: Option<u64>,
}

impl HashMapIndex {
    /// Attach to the hash root of `pool`, creating it on a fresh pool
    pub fn open(mut pool: Pool) -> Result<Self, PoolError> {
        let root = match pool.root()? {
            0 => Self::create(&mut pool)?,
            root => {
                Self::validate(&pool, root)?;
                root
            }
        };
        Ok(Self { pool, root })
    }

    fn create(pool: &mut Pool) -> Result<u64, PoolError> {
        pool.transaction(|tx| {
            let segment = tx.alloc(INITIAL_BUCKETS * 8)?;
            tx.write_fresh(segment, &vec![0u8; (INITIAL_BUCKETS * 8) as usize])?;

            let root = tx.alloc(ROOT_SIZE)?;
            let mut buf = vec![0u8; ROOT_SIZE as usize];
            buf[0..8].copy_from_slice(&ROOT_MAGIC.to_le_bytes());
            buf[SEGMENTS_AT as usize..SEGMENTS_AT as usize + 8]
                .copy_from_slice(&segment.to_le_bytes());
            tx.write_fresh(root, &buf)?;
            tx.set_root(root)?;
            Ok(root)
        })
    }

    fn validate(pool: &Pool, root: u64) -> Result<(), PoolError> {
        if pool.read_u64(root + MAGIC_AT)? != ROOT_MAGIC {
            return Err(PoolError::Corrupted("hash root magic mismatch".to_string()));
        }
        let level = pool.read_u64(root + LEVEL_AT)?;
        let split = pool.read_u64(root + SPLIT_AT)?;
        if level >= MAX_SEGMENTS - 1 || split >= INITIAL_BUCKETS << level {
            return Err(PoolError::Corrupted(format!(
                "bad hash geometry: level {}, split {}",
                level, split
            )));
        }
        let used_segments = if split > 0 { level + 2 } else { level + 1 };
        for segment in 0..used_segments {
            if pool.read_u64(root + SEGMENTS_AT + segment * 8)? == 0 {
                return Err(PoolError::Corrupted(format!(
                    "hash segment {} missing",
                    segment
                )));
            }
        }
        Ok(())
    }

    /// Number of buckets currently addressable
    pub fn bucket_count(&self) -> Result<u64, PoolError> {
        let level = self.pool.read_u64(self.root + LEVEL_AT)?;
        let split = self.pool.read_u64(self.root + SPLIT_AT)?;
        Ok((INITIAL_BUCKETS << level) + split)
    }

    /// The backing pool
    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

impl KvIndex for HashMapIndex {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), PoolError> {
        let root = self.root;
        let len = RECORD_AT + record::encoded_len(key, value)?;

        self.pool.transaction(|tx| {
            let location = locate(&*tx, root, key)?;
            let entry = tx.alloc(len)?;

            let next = match location.entry {
                Some(old) => tx.read_u64(old + NEXT_AT)?,
                None => tx.read_u64(location.slot)?,
            };

            let mut buf = Vec::with_capacity(len as usize);
            buf.extend_from_slice(&next.to_le_bytes());
            buf.extend_from_slice(&location.hash.to_le_bytes());
            record::encode_into(&mut buf, key, value);
            tx.write_fresh(entry, &buf)?;

            match location.entry {
                Some(old) => {
                    tx.write_u64(location.link, entry)?;
                    tx.free(old)
                }
                None => {
                    tx.write_u64(location.slot, entry)?;
                    let count = tx.read_u64(root + COUNT_AT)? + 1;
                    tx.write_u64(root + COUNT_AT, count)?;
                    maybe_split(tx, root, count)
                }
            }
        })
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, PoolError> {
        match locate(&self.pool, self.root, key)?.entry {
            Some(entry) => {
                let (_, value) = record::entry(&self.pool, entry + RECORD_AT)?;
                Ok(Some(value.to_vec()))
            }
            None => Ok(None),
        }
    }

    fn exists(&self, key: &[u8]) -> Result<bool, PoolError> {
        Ok(locate(&self.pool, self.root, key)?.entry.is_some())
    }

    fn remove(&mut self, key: &[u8]) -> Result<bool, PoolError> {
        let root = self.root;
        let location = locate(&self.pool, root, key)?;
        let entry = match location.entry {
            Some(entry) => entry,
            None => return Ok(false),
        };

        self.pool.transaction(|tx| {
            let next = tx.read_u64(entry + NEXT_AT)?;
            tx.write_u64(location.link, next)?;
            tx.free(entry)?;
            let count = tx.read_u64(root + COUNT_AT)?;
            tx.write_u64(root + COUNT_AT, count.saturating_sub(1))
        })?;
        Ok(true)
    }

    fn count(&self) -> Result<u64, PoolError> {
        self.pool.read_u64(self.root + COUNT_AT)
    }

    fn scan(&self, visit: &mut Visitor<'_>) -> Result<(), PoolError> {
        let buckets = self.bucket_count()?;
        for bucket in 0..buckets {
            let mut entry = self.pool.read_u64(slot_offset(&self.pool, self.root, bucket)?)?;
            while entry != 0 {
                let (key, value) = record::entry(&self.pool, entry + RECORD_AT)?;
                if let ControlFlow::Break(()) = visit(key, value) {
                    return Ok(());
                }
                entry = self.pool.read_u64(entry + NEXT_AT)?;
            }
        }
        Ok(())
    }
}

// =============================================================================
// Hashing and Addressing
// =============================================================================

/// 64-bit hash of the key bytes: crc32 spread by the splitmix64 finalizer
fn hash_key(key: &[u8]) -> u64 {
    let mut z = crc32fast::hash(key) as u64 ^ ((key.len() as u64) << 32);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

fn bucket_for(hash: u64, level: u64, split: u64) -> u64 {
    let buckets = INITIAL_BUCKETS << level;
    let bucket = hash % buckets;
    if bucket < split {
        hash % (buckets << 1)
    } else {
        bucket
    }
}

/// Offset of the slot for `bucket`
fn slot_offset<R: PoolRead>(pool: &R, root: u64, bucket: u64) -> Result<u64, PoolError> {
    let (segment, index) = if bucket < INITIAL_BUCKETS {
        (0, bucket)
    } else {
        let segment = 64 - (bucket / INITIAL_BUCKETS).leading_zeros() as u64;
        (segment, bucket - (INITIAL_BUCKETS << (segment - 1)))
    };
    if segment >= MAX_SEGMENTS {
        return Err(PoolError::Corrupted(format!("bucket {} beyond directory", bucket)));
    }

    let base = pool.read_u64(root + SEGMENTS_AT + segment * 8)?;
    if base == 0 {
        return Err(PoolError::Corrupted(format!("hash segment {} missing", segment)));
    }
    Ok(base + index * 8)
}

fn locate<R: PoolRead>(pool: &R, root: u64, key: &[u8]) -> Result<Location, PoolError> {
    let hash = hash_key(key);
    let level = pool.read_u64(root + LEVEL_AT)?;
    let split = pool.read_u64(root + SPLIT_AT)?;
    let slot = slot_offset(pool, root, bucket_for(hash, level, split))?;

    let mut link = slot;
    let mut entry = pool.read_u64(slot)?;
    while entry != 0 {
        if pool.read_u64(entry + HASH_AT)? == hash
            && record::key(pool, entry + RECORD_AT)? == key
        {
            return Ok(Location {
                hash,
                slot,
                link,
                entry: Some(entry),
            });
        }
        link = entry + NEXT_AT;
        entry = pool.read_u64(link)?;
    }

    Ok(Location {
        hash,
        slot,
        link,
        entry: None,
    })
}

// =============================================================================
// Growth
// =============================================================================

/// Split the bucket at the split pointer if the table is overloaded
fn maybe_split(tx: &mut Transaction<'_>, root: u64, count: u64) -> Result<(), PoolError> {
    let level = tx.read_u64(root + LEVEL_AT)?;
    let split = tx.read_u64(root + SPLIT_AT)?;
    let buckets = INITIAL_BUCKETS << level;

    if count <= (buckets + split) * MAX_LOAD || level + 2 >= MAX_SEGMENTS {
        return Ok(());
    }

    // First split of a level opens the segment holding buckets [n, 2n)
    let segment_at = root + SEGMENTS_AT + (level + 1) * 8;
    if split == 0 && tx.read_u64(segment_at)? == 0 {
        let segment = tx.alloc(buckets * 8)?;
        tx.write_fresh(segment, &vec![0u8; (buckets * 8) as usize])?;
        tx.write_u64(segment_at, segment)?;
    }

    let old_slot = slot_offset(&*tx, root, split)?;
    let new_slot = slot_offset(&*tx, root, split + buckets)?;

    let mut keep = Vec::new();
    let mut moved = Vec::new();
    let mut entry = tx.read_u64(old_slot)?;
    while entry != 0 {
        if tx.read_u64(entry + HASH_AT)? % (buckets << 1) == split {
            keep.push(entry);
        } else {
            moved.push(entry);
        }
        entry = tx.read_u64(entry + NEXT_AT)?;
    }

    relink(tx, old_slot, &keep)?;
    relink(tx, new_slot, &moved)?;

    if split + 1 == buckets {
        tx.write_u64(root + LEVEL_AT, level + 1)?;
        tx.write_u64(root + SPLIT_AT, 0)?;
    } else {
        tx.write_u64(root + SPLIT_AT, split + 1)?;
    }

    debug!(
        bucket = split,
        kept = keep.len(),
        moved = moved.len(),
        level,
        "split hash bucket"
    );
    Ok(())
}

/// Rewrite a chain to contain exactly `entries`, in order
fn relink(tx: &mut Transaction<'_>, slot: u64, entries: &[u64]) -> Result<(), PoolError> {
    let mut link = slot;
    for &entry in entries {
        tx.write_u64(link, entry)?;
        link = entry + NEXT_AT;
    }
    tx.write_u64(link, 0)
}
