//! Pool header
//!
//! Written once when the pool is created and validated on every attach.
//!
//! ```text
//! ┌──────────┬──────────┬──────────────────────────────┐
//! │ Len (4)  │ CRC (4)  │ bincode(PoolHeader)          │
//! └──────────┴──────────┴──────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{OpenError, PoolError};

use super::{HEADER_CAPACITY, HEAP_START};

/// Magic bytes identifying a PoolKV pool file
pub(crate) const MAGIC: [u8; 8] = *b"POOLKV\0\0";

/// Current pool format version
pub(crate) const VERSION: u32 = 1;

/// Length prefix (4) + CRC (4)
const PREFIX_SIZE: usize = 8;

/// Longest layout name accepted
const MAX_LAYOUT_LEN: usize = 64;

/// Immutable description of a pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolHeader {
    pub magic: [u8; 8],
    pub version: u32,
    /// Layout name of the index that owns the pool
    pub layout: String,
    /// Total file size in bytes, fixed at creation
    pub pool_size: u64,
    /// First byte of the allocator heap
    pub heap_start: u64,
}

impl PoolHeader {
    pub fn new(layout: &str, pool_size: u64) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            layout: layout.to_string(),
            pool_size,
            heap_start: HEAP_START,
        }
    }

    /// Serialize into the on-disk form (length prefix, CRC, body)
    pub fn encode(&self) -> Result<Vec<u8>, PoolError> {
        let body = bincode::serialize(self)
            .map_err(|e| PoolError::Corrupted(format!("header encode: {}", e)))?;
        if PREFIX_SIZE + body.len() > HEADER_CAPACITY {
            return Err(PoolError::Corrupted(format!(
                "header of {} bytes does not fit the header page",
                body.len()
            )));
        }

        let mut out = Vec::with_capacity(PREFIX_SIZE + body.len());
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Parse and checksum the header region of a pool file
    pub fn decode(region: &[u8]) -> Result<Self, OpenError> {
        if region.len() < PREFIX_SIZE {
            return Err(OpenError::InvalidPool("truncated header".to_string()));
        }

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&region[0..4]);
        let len = u32::from_le_bytes(len_bytes) as usize;

        let mut crc_bytes = [0u8; 4];
        crc_bytes.copy_from_slice(&region[4..8]);
        let stored_crc = u32::from_le_bytes(crc_bytes);

        if len == 0 || PREFIX_SIZE + len > region.len() {
            return Err(OpenError::InvalidPool(format!("bad header length {}", len)));
        }

        let body = &region[PREFIX_SIZE..PREFIX_SIZE + len];
        let actual_crc = crc32fast::hash(body);
        if actual_crc != stored_crc {
            return Err(OpenError::InvalidPool(format!(
                "header checksum mismatch: stored {:#010x}, computed {:#010x}",
                stored_crc, actual_crc
            )));
        }

        bincode::deserialize(body)
            .map_err(|e| OpenError::InvalidPool(format!("header decode: {}", e)))
    }

    /// Check the header against the file it came from and the expected layout
    pub fn validate(&self, file_len: u64, layout: &str) -> Result<(), OpenError> {
        if self.magic != MAGIC {
            return Err(OpenError::InvalidPool(format!(
                "bad magic {:?}",
                self.magic
            )));
        }
        if self.version != VERSION {
            return Err(OpenError::InvalidPool(format!(
                "unsupported pool version {}",
                self.version
            )));
        }
        if self.layout.len() > MAX_LAYOUT_LEN || self.layout != layout {
            return Err(OpenError::InvalidPool(format!(
                "layout mismatch: pool has {:?}, engine expects {:?}",
                self.layout, layout
            )));
        }
        if self.pool_size != file_len {
            return Err(OpenError::InvalidPool(format!(
                "pool size {} does not match file length {}",
                self.pool_size, file_len
            )));
        }
        if self.heap_start != HEAP_START || self.heap_start >= self.pool_size {
            return Err(OpenError::InvalidPool(format!(
                "bad heap start {}",
                self.heap_start
            )));
        }
        Ok(())
    }
}
