//! Ordered tree index
//!
//! Records are kept in a persistent, doubly linked chain of sorted leaves.
//! Inner nodes are volatile: a separator map from the lowest key a leaf may
//! hold to the leaf, rebuilt by walking the chain on open.
//!
//! ## Root Layout
//! ```text
//! ┌───────────┬───────────┬───────────┐
//! │ Magic (8) │ Count (8) │ Head (8)  │
//! └───────────┴───────────┴───────────┘
//! ```
//!
//! ## Leaf Layout
//! ```text
//! ┌──────────┬──────────┬───────────┬──────────────────────────────┐
//! │ Next (8) │ Prev (8) │ Count (8) │ Slots (32 x 8, sorted keys)  │
//! └──────────┴──────────┴───────────┴──────────────────────────────┘
//! ```
//! Each slot is the offset of a record (see record.rs).
//!
//! ## Invariants
//! - The head leaf is never freed; it is the only leaf that may be empty
//! - Keys are ascending by unsigned byte order within and across leaves
//! - A leaf below a quarter full absorbs its successor (or is absorbed by
//!   its predecessor) whenever the pair fits in one leaf

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::ops::{Bound, ControlFlow};

use tracing::debug;

use crate::error::PoolError;
use crate::pool::{Pool, PoolRead, Transaction};

use super::record;
use super::{KvIndex, Visitor};

const ROOT_MAGIC: u64 = u64::from_le_bytes(*b"KVBTREE1");

const MAGIC_AT: u64 = 0;
const COUNT_AT: u64 = 8;
const HEAD_AT: u64 = 16;
const ROOT_SIZE: u64 = 24;

/// Records per leaf
pub(crate) const LEAF_SLOTS: usize = 32;

/// Leaves below this size try to merge with a neighbor
const MERGE_THRESHOLD: usize = LEAF_SLOTS / 4;

const NEXT_AT: u64 = 0;
const PREV_AT: u64 = 8;
const LEAF_COUNT_AT: u64 = 16;
const SLOTS_AT: u64 = 24;
const LEAF_SIZE: u64 = SLOTS_AT + LEAF_SLOTS as u64 * 8;

/// Persistent ordered index
pub struct BTreeIndex {
    pool: Pool,

    /// Offset of the root object
    root: u64,

    /// Volatile inner level
    separators: Separators,
}

/// Separator key -> leaf, plus the reverse mapping for removals
#[derive(Debug, Default)]
struct Separators {
    by_key: BTreeMap<Vec<u8>, u64>,
    by_leaf: HashMap<u64, Vec<u8>>,
}

/// Separator updates produced by a committed transaction
enum SeparatorChange {
    Insert(Vec<u8>, u64),
    RemoveLeaf(u64),
}

impl Separators {
    fn insert(&mut self, separator: Vec<u8>, leaf: u64) {
        self.by_leaf.insert(leaf, separator.clone());
        self.by_key.insert(separator, leaf);
    }

    fn remove_leaf(&mut self, leaf: u64) {
        if let Some(separator) = self.by_leaf.remove(&leaf) {
            self.by_key.remove(&separator);
        }
    }

    fn apply(&mut self, changes: Vec<SeparatorChange>) {
        for change in changes {
            match change {
                SeparatorChange::Insert(separator, leaf) => self.insert(separator, leaf),
                SeparatorChange::RemoveLeaf(leaf) => self.remove_leaf(leaf),
            }
        }
    }

    /// Leaf whose key range covers `key`
    fn leaf_for(&self, key: &[u8]) -> Result<u64, PoolError> {
        self.by_key
            .range::<[u8], _>((Bound::Unbounded, Bound::Included(key)))
            .next_back()
            .map(|(_, &leaf)| leaf)
            .ok_or_else(|| PoolError::Corrupted("no leaf covers key".to_string()))
    }

    fn len(&self) -> usize {
        self.by_key.len()
    }
}

impl BTreeIndex {
    /// Attach to the tree root of `pool`, creating it on a fresh pool
    pub fn open(mut pool: Pool) -> Result<Self, PoolError> {
        let root = match pool.root()? {
            0 => Self::create(&mut pool)?,
            root => root,
        };
        let separators = Self::rebuild(&pool, root)?;
        Ok(Self {
            pool,
            root,
            separators,
        })
    }

    fn create(pool: &mut Pool) -> Result<u64, PoolError> {
        pool.transaction(|tx| {
            let head = tx.alloc(LEAF_SIZE)?;
            tx.write_fresh(head, &encode_leaf(0, 0, &[]))?;

            let root = tx.alloc(ROOT_SIZE)?;
            let mut buf = Vec::with_capacity(ROOT_SIZE as usize);
            buf.extend_from_slice(&ROOT_MAGIC.to_le_bytes());
            buf.extend_from_slice(&0u64.to_le_bytes());
            buf.extend_from_slice(&head.to_le_bytes());
            tx.write_fresh(root, &buf)?;
            tx.set_root(root)?;
            Ok(root)
        })
    }

    /// Walk the leaf chain, checking links and order, and build separators
    fn rebuild(pool: &Pool, root: u64) -> Result<Separators, PoolError> {
        if pool.read_u64(root + MAGIC_AT)? != ROOT_MAGIC {
            return Err(PoolError::Corrupted("tree root magic mismatch".to_string()));
        }

        let expected = pool.read_u64(root + COUNT_AT)?;
        let max_leaves = pool.size() / LEAF_SIZE;

        let mut separators = Separators::default();
        let mut last_key: Option<Vec<u8>> = None;
        let mut total = 0u64;
        let mut prev = 0u64;
        let mut leaf = pool.read_u64(root + HEAD_AT)?;

        while leaf != 0 {
            if separators.len() as u64 > max_leaves {
                return Err(PoolError::Corrupted("leaf chain has a cycle".to_string()));
            }
            if pool.read_u64(leaf + PREV_AT)? != prev {
                return Err(PoolError::Corrupted(format!(
                    "leaf {} has a broken back link",
                    leaf
                )));
            }

            let slots = leaf_slots(pool, leaf)?;
            for &slot in &slots {
                let key = record::key(pool, slot)?;
                if let Some(last) = &last_key {
                    if last.as_slice() >= key {
                        return Err(PoolError::Corrupted(format!(
                            "keys out of order in leaf {}",
                            leaf
                        )));
                    }
                }
                last_key = Some(key.to_vec());
            }

            let separator = if prev == 0 {
                Vec::new()
            } else {
                match slots.first() {
                    Some(&first) => record::key(pool, first)?.to_vec(),
                    None => {
                        return Err(PoolError::Corrupted(format!(
                            "empty leaf {} inside the chain",
                            leaf
                        )))
                    }
                }
            };
            separators.insert(separator, leaf);

            total += slots.len() as u64;
            prev = leaf;
            leaf = pool.read_u64(leaf + NEXT_AT)?;
        }

        if total != expected {
            return Err(PoolError::Corrupted(format!(
                "tree holds {} records, root says {}",
                total, expected
            )));
        }
        Ok(separators)
    }

    /// Number of leaves in the chain
    pub fn leaf_count(&self) -> usize {
        self.separators.len()
    }

    /// The backing pool
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Locate `key`: (leaf, its slots, search result)
    fn find(&self, key: &[u8]) -> Result<(u64, Vec<u64>, Result<usize, usize>), PoolError> {
        let leaf = self.separators.leaf_for(key)?;
        let slots = leaf_slots(&self.pool, leaf)?;
        let position = search(&self.pool, &slots, key)?;
        Ok((leaf, slots, position))
    }
}

impl KvIndex for BTreeIndex {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), PoolError> {
        let root = self.root;
        let len = record::encoded_len(key, value)?;
        let (leaf, mut slots, position) = self.find(key)?;

        let changes = self.pool.transaction(|tx| {
            let rec = tx.alloc(len)?;
            let mut buf = Vec::with_capacity(len as usize);
            record::encode_into(&mut buf, key, value);
            tx.write_fresh(rec, &buf)?;

            match position {
                Ok(i) => {
                    let old = slots[i];
                    tx.write_u64(leaf + SLOTS_AT + i as u64 * 8, rec)?;
                    tx.free(old)?;
                    Ok(Vec::new())
                }
                Err(i) => {
                    slots.insert(i, rec);
                    let count = tx.read_u64(root + COUNT_AT)?;
                    tx.write_u64(root + COUNT_AT, count + 1)?;

                    if slots.len() <= LEAF_SLOTS {
                        write_slots(tx, leaf, &slots)?;
                        Ok(Vec::new())
                    } else {
                        split_leaf(tx, leaf, &slots)
                    }
                }
            }
        })?;

        self.separators.apply(changes);
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, PoolError> {
        match self.find(key)? {
            (_, slots, Ok(i)) => {
                let (_, value) = record::entry(&self.pool, slots[i])?;
                Ok(Some(value.to_vec()))
            }
            _ => Ok(None),
        }
    }

    fn exists(&self, key: &[u8]) -> Result<bool, PoolError> {
        Ok(self.find(key)?.2.is_ok())
    }

    fn remove(&mut self, key: &[u8]) -> Result<bool, PoolError> {
        let root = self.root;
        let (leaf, mut slots, position) = self.find(key)?;
        let i = match position {
            Ok(i) => i,
            Err(_) => return Ok(false),
        };

        let changes = self.pool.transaction(|tx| {
            let rec = slots.remove(i);
            write_slots(tx, leaf, &slots)?;
            tx.free(rec)?;
            let count = tx.read_u64(root + COUNT_AT)?;
            tx.write_u64(root + COUNT_AT, count.saturating_sub(1))?;
            rebalance(tx, leaf, &slots)
        })?;

        self.separators.apply(changes);
        Ok(true)
    }

    fn count(&self) -> Result<u64, PoolError> {
        self.pool.read_u64(self.root + COUNT_AT)
    }

    fn scan(&self, visit: &mut Visitor<'_>) -> Result<(), PoolError> {
        let mut leaf = self.pool.read_u64(self.root + HEAD_AT)?;
        while leaf != 0 {
            for slot in leaf_slots(&self.pool, leaf)? {
                let (key, value) = record::entry(&self.pool, slot)?;
                if let ControlFlow::Break(()) = visit(key, value) {
                    return Ok(());
                }
            }
            leaf = self.pool.read_u64(leaf + NEXT_AT)?;
        }
        Ok(())
    }
}

// =============================================================================
// Leaf Helpers
// =============================================================================

fn encode_leaf(next: u64, prev: u64, slots: &[u64]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(LEAF_SIZE as usize);
    buf.extend_from_slice(&next.to_le_bytes());
    buf.extend_from_slice(&prev.to_le_bytes());
    buf.extend_from_slice(&(slots.len() as u64).to_le_bytes());
    for slot in slots {
        buf.extend_from_slice(&slot.to_le_bytes());
    }
    buf.resize(LEAF_SIZE as usize, 0);
    buf
}

fn leaf_slots<R: PoolRead>(pool: &R, leaf: u64) -> Result<Vec<u64>, PoolError> {
    let count = pool.read_u64(leaf + LEAF_COUNT_AT)?;
    if count > LEAF_SLOTS as u64 {
        return Err(PoolError::Corrupted(format!(
            "leaf {} claims {} slots",
            leaf, count
        )));
    }
    let raw = pool.bytes(leaf + SLOTS_AT, count * 8)?;
    Ok(raw
        .chunks_exact(8)
        .map(|chunk| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            u64::from_le_bytes(buf)
        })
        .collect())
}

/// Binary search by unsigned byte order of the record keys
fn search<R: PoolRead>(pool: &R, slots: &[u64], key: &[u8]) -> Result<Result<usize, usize>, PoolError> {
    let (mut lo, mut hi) = (0, slots.len());
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match record::key(pool, slots[mid])?.cmp(key) {
            Ordering::Less => lo = mid + 1,
            Ordering::Greater => hi = mid,
            Ordering::Equal => return Ok(Ok(mid)),
        }
    }
    Ok(Err(lo))
}

/// Rewrite count and slots of an existing leaf
fn write_slots(tx: &mut Transaction<'_>, leaf: u64, slots: &[u64]) -> Result<(), PoolError> {
    let mut buf = Vec::with_capacity(8 + slots.len() * 8);
    buf.extend_from_slice(&(slots.len() as u64).to_le_bytes());
    for slot in slots {
        buf.extend_from_slice(&slot.to_le_bytes());
    }
    tx.write(leaf + LEAF_COUNT_AT, &buf)
}

/// Move the upper half of an overfull slot list into a new successor leaf
fn split_leaf(
    tx: &mut Transaction<'_>,
    leaf: u64,
    slots: &[u64],
) -> Result<Vec<SeparatorChange>, PoolError> {
    let (left, right) = slots.split_at(slots.len() / 2);
    let next = tx.read_u64(leaf + NEXT_AT)?;

    let sibling = tx.alloc(LEAF_SIZE)?;
    tx.write_fresh(sibling, &encode_leaf(next, leaf, right))?;

    write_slots(tx, leaf, left)?;
    tx.write_u64(leaf + NEXT_AT, sibling)?;
    if next != 0 {
        tx.write_u64(next + PREV_AT, sibling)?;
    }

    let separator = record::key(&*tx, right[0])?.to_vec();
    debug!(leaf, sibling, left = left.len(), right = right.len(), "split tree leaf");
    Ok(vec![SeparatorChange::Insert(separator, sibling)])
}

/// Merge an underfull leaf with a neighbor when the pair fits in one leaf
fn rebalance(
    tx: &mut Transaction<'_>,
    leaf: u64,
    slots: &[u64],
) -> Result<Vec<SeparatorChange>, PoolError> {
    if slots.len() >= MERGE_THRESHOLD {
        return Ok(Vec::new());
    }

    let next = tx.read_u64(leaf + NEXT_AT)?;
    if next != 0 {
        let next_slots = leaf_slots(&*tx, next)?;
        if slots.len() + next_slots.len() <= LEAF_SLOTS {
            return absorb(tx, leaf, slots, next, &next_slots);
        }
    }

    let prev = tx.read_u64(leaf + PREV_AT)?;
    if prev != 0 {
        let prev_slots = leaf_slots(&*tx, prev)?;
        if prev_slots.len() + slots.len() <= LEAF_SLOTS {
            return absorb(tx, prev, &prev_slots, leaf, slots);
        }
    }

    Ok(Vec::new())
}

/// Append `right`'s records to `left`, unlink `right` and free it
fn absorb(
    tx: &mut Transaction<'_>,
    left: u64,
    left_slots: &[u64],
    right: u64,
    right_slots: &[u64],
) -> Result<Vec<SeparatorChange>, PoolError> {
    let mut merged = Vec::with_capacity(left_slots.len() + right_slots.len());
    merged.extend_from_slice(left_slots);
    merged.extend_from_slice(right_slots);
    write_slots(tx, left, &merged)?;

    let after = tx.read_u64(right + NEXT_AT)?;
    tx.write_u64(left + NEXT_AT, after)?;
    if after != 0 {
        tx.write_u64(after + PREV_AT, left)?;
    }
    tx.free(right)?;

    debug!(left, right, records = merged.len(), "merged tree leaves");
    Ok(vec![SeparatorChange::RemoveLeaf(right)])
}
