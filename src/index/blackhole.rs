//! Blackhole index
//!
//! Accepts every write and stores nothing. No pool is opened.

use crate::error::PoolError;

use super::{KvIndex, Visitor};

/// Null index: always empty
#[derive(Debug, Default, Clone, Copy)]
pub struct Blackhole;

impl KvIndex for Blackhole {
    fn put(&mut self, _key: &[u8], _value: &[u8]) -> Result<(), PoolError> {
        Ok(())
    }

    fn get(&self, _key: &[u8]) -> Result<Option<Vec<u8>>, PoolError> {
        Ok(None)
    }

    fn exists(&self, _key: &[u8]) -> Result<bool, PoolError> {
        Ok(false)
    }

    fn remove(&mut self, _key: &[u8]) -> Result<bool, PoolError> {
        Ok(false)
    }

    fn count(&self) -> Result<u64, PoolError> {
        Ok(0)
    }

    fn scan(&self, _visit: &mut Visitor<'_>) -> Result<(), PoolError> {
        Ok(())
    }
}
