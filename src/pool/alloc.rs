//! Size classes for the pool allocator
//!
//! Every heap block starts with an 8-byte header word:
//! bit 63 = allocated, low byte = size class. A free block stores the
//! offset of the next free block of its class right after the header.

use crate::error::PoolError;

use super::META_FREE_HEADS;

/// Number of size classes (32 B << 0 ..= 32 B << 24 = 512 MiB)
pub(crate) const NUM_CLASSES: usize = 25;

/// Smallest block, header included
pub(crate) const MIN_BLOCK: u64 = 32;

/// Block header size
pub(crate) const BLOCK_HEADER: u64 = 8;

const ALLOCATED: u64 = 1 << 63;
const CLASS_MASK: u64 = 0xff;

/// Smallest class whose block holds `payload` bytes plus the header
pub(crate) fn class_for(payload: u64) -> Option<usize> {
    let need = payload.checked_add(BLOCK_HEADER)?;
    (0..NUM_CLASSES).find(|&class| block_size(class) >= need)
}

pub(crate) fn block_size(class: usize) -> u64 {
    MIN_BLOCK << class
}

/// Offset of the free-list head word for `class`
pub(crate) fn free_head_offset(class: usize) -> u64 {
    META_FREE_HEADS + class as u64 * 8
}

pub(crate) fn encode_header(class: usize, allocated: bool) -> u64 {
    let word = class as u64 & CLASS_MASK;
    if allocated {
        word | ALLOCATED
    } else {
        word
    }
}

/// Returns (class, allocated)
pub(crate) fn decode_header(block: u64, word: u64) -> Result<(usize, bool), PoolError> {
    let class = (word & CLASS_MASK) as usize;
    if class >= NUM_CLASSES || word & !(CLASS_MASK | ALLOCATED) != 0 {
        return Err(PoolError::Corrupted(format!(
            "bad block header {:#x} at {}",
            word, block
        )));
    }
    Ok((class, word & ALLOCATED != 0))
}
