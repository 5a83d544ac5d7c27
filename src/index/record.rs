//! Key/value record encoding
//!
//! ```text
//! ┌──────────────┬──────────────┬───────┬─────────┐
//! │ KeyLen (4)   │ ValLen (4)   │ Key   │ Value   │
//! └──────────────┴──────────────┴───────┴─────────┘
//! ```

use crate::error::PoolError;
use crate::pool::PoolRead;

pub(crate) const RECORD_HEADER: u64 = 8;

/// Encoded size of a record; lengths beyond u32 cannot be stored
pub(crate) fn encoded_len(key: &[u8], value: &[u8]) -> Result<u64, PoolError> {
    if key.len() > u32::MAX as usize || value.len() > u32::MAX as usize {
        return Err(PoolError::OutOfSpace);
    }
    Ok(RECORD_HEADER + key.len() as u64 + value.len() as u64)
}

/// Append the encoded record to `buf`
pub(crate) fn encode_into(buf: &mut Vec<u8>, key: &[u8], value: &[u8]) {
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
}

/// Borrow the key of the record at `offset`
pub(crate) fn key<R: PoolRead>(pool: &R, offset: u64) -> Result<&[u8], PoolError> {
    let key_len = pool.read_u32(offset)? as u64;
    pool.bytes(offset + RECORD_HEADER, key_len)
}

/// Borrow key and value of the record at `offset`
pub(crate) fn entry<R: PoolRead>(pool: &R, offset: u64) -> Result<(&[u8], &[u8]), PoolError> {
    let key_len = pool.read_u32(offset)? as u64;
    let val_len = pool.read_u32(offset + 4)? as u64;
    let key = pool.bytes(offset + RECORD_HEADER, key_len)?;
    let value = pool.bytes(offset + RECORD_HEADER + key_len, val_len)?;
    Ok((key, value))
}
