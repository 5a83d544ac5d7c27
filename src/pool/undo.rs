//! Undo log
//!
//! Before a transaction overwrites pool bytes, the old bytes are appended
//! here. Commit clears the log; a non-empty log found on attach (or on abort)
//! is replayed newest-first to restore the pre-transaction state.
//!
//! ## Entry Format
//! ```text
//! ┌────────────┬─────────┬─────────┬──────────┬─────────────────────┐
//! │ Offset (8) │ Len (8) │ CRC (4) │ Pad (4)  │ Old bytes (pad to 8)│
//! └────────────┴─────────┴─────────┴──────────┴─────────────────────┘
//! ```
//! The count word is bumped only after the entry is flushed; a torn last
//! entry fails its CRC and is ignored (its data write never happened).

use crate::error::PoolError;

use super::{Pool, PoolRead, UNDO_OFFSET, UNDO_SIZE};

/// Number of live entries
pub(crate) const LOG_COUNT: u64 = UNDO_OFFSET;

/// First entry
pub(crate) const LOG_ENTRIES: u64 = UNDO_OFFSET + 8;

const LOG_END: u64 = UNDO_OFFSET + UNDO_SIZE;
const ENTRY_HEADER: u64 = 24;

fn padded(len: u64) -> u64 {
    (len + 7) & !7
}

fn entry_crc(offset: u64, len: u64, data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&offset.to_le_bytes());
    hasher.update(&len.to_le_bytes());
    hasher.update(data);
    hasher.finalize()
}

/// Log the current contents of `[offset, offset + len)` as entry number
/// `index` at log position `at`. Returns the next free log position.
pub(crate) fn append(
    pool: &mut Pool,
    at: u64,
    index: u64,
    offset: u64,
    len: u64,
) -> Result<u64, PoolError> {
    let end = at
        .checked_add(ENTRY_HEADER)
        .and_then(|p| p.checked_add(padded(len)))
        .filter(|&end| end <= LOG_END)
        .ok_or(PoolError::OutOfSpace)?;

    let old = pool.bytes(offset, len)?;
    let crc = entry_crc(offset, len, old);

    let mut entry = Vec::with_capacity((end - at) as usize);
    entry.extend_from_slice(&offset.to_le_bytes());
    entry.extend_from_slice(&len.to_le_bytes());
    entry.extend_from_slice(&crc.to_le_bytes());
    entry.extend_from_slice(&[0u8; 4]);
    entry.extend_from_slice(old);
    entry.resize((end - at) as usize, 0);

    // The entry must be durable before the count can reach it
    pool.write_raw(at, &entry)?;
    pool.persist(at, end - at)?;
    pool.write_raw(LOG_COUNT, &(index + 1).to_le_bytes())?;
    pool.persist(LOG_COUNT, 8)?;

    Ok(end)
}

/// Mark the log empty
pub(crate) fn clear(pool: &mut Pool) -> Result<(), PoolError> {
    pool.write_raw(LOG_COUNT, &0u64.to_le_bytes())?;
    pool.persist(LOG_COUNT, 8)
}

/// Replay the log newest-first, then clear it. Returns entries applied.
pub(crate) fn recover(pool: &mut Pool) -> Result<u64, PoolError> {
    let count = pool.read_u64(LOG_COUNT)?;
    if count == 0 {
        return Ok(0);
    }

    // (target offset, data position, len)
    let mut entries: Vec<(u64, u64, u64)> = Vec::new();
    let mut at = LOG_ENTRIES;

    for i in 0..count {
        let last = i + 1 == count;

        if at + ENTRY_HEADER > LOG_END {
            return Err(PoolError::Corrupted(format!(
                "undo log count {} overruns the log",
                count
            )));
        }

        let offset = pool.read_u64(at)?;
        let len = pool.read_u64(at + 8)?;
        let stored_crc = pool.read_u32(at + 16)?;

        let data_at = at + ENTRY_HEADER;
        let fits = len <= UNDO_SIZE && data_at + padded(len) <= LOG_END;
        let valid = fits && {
            let data = pool.bytes(data_at, len)?;
            entry_crc(offset, len, data) == stored_crc
        };

        if !valid {
            if last {
                // Torn append; the guarded write never started
                break;
            }
            return Err(PoolError::Corrupted(format!(
                "undo log entry {} of {} is damaged",
                i, count
            )));
        }

        entries.push((offset, data_at, len));
        at = data_at + padded(len);
    }

    for &(offset, data_at, len) in entries.iter().rev() {
        let old = pool.bytes(data_at, len)?.to_vec();
        pool.write_raw(offset, &old)?;
        pool.persist(offset, len)?;
    }

    clear(pool)?;
    Ok(entries.len() as u64)
}
