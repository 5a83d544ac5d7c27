//! Tests for the persistent Pool
//!
//! These tests verify:
//! - Create/attach lifecycle and size bounds
//! - Header validation (layout, checksum, file length)
//! - Transaction commit, abort and rollback on error or drop
//! - Crash recovery from a non-empty undo log
//! - Allocator reuse, double free detection and exhaustion

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use poolkv::config::{FlushMode, MIN_POOL_SIZE};
use poolkv::error::{OpenError, PoolError};
use poolkv::pool::{Pool, PoolRead};
use tempfile::TempDir;

const LAYOUT: &str = "poolkv.test";
const SIZE: u64 = MIN_POOL_SIZE;

/// Undo log count word, at the start of the second page
const UNDO_COUNT_AT: u64 = 4096;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_pool() -> (TempDir, PathBuf, Pool) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.pool");
    let pool = Pool::create(&path, SIZE, LAYOUT, FlushMode::EveryCommit).unwrap();
    (temp_dir, path, pool)
}

fn attach(path: &Path) -> Result<Pool, OpenError> {
    Pool::attach(path, LAYOUT, FlushMode::EveryCommit)
}

/// Allocate a committed 64-byte scratch block holding `initial`
fn scratch(pool: &mut Pool, initial: u64) -> u64 {
    pool.transaction(|tx| {
        let block = tx.alloc(64)?;
        tx.write_fresh(block, &[0u8; 64])?;
        tx.write_u64(block, initial)?;
        tx.set_root(block)?;
        Ok(block)
    })
    .unwrap()
}

fn patch_file(path: &Path, offset: u64, bytes: &[u8]) {
    let mut file = OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(bytes).unwrap();
    file.sync_all().unwrap();
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_pool_create_and_attach() {
    let (_temp, path, pool) = setup_temp_pool();
    assert_eq!(pool.size(), SIZE);
    assert_eq!(pool.layout(), LAYOUT);
    assert_eq!(pool.root().unwrap(), 0);
    assert_eq!(pool.heap_top().unwrap(), pool.heap_start());
    drop(pool);

    let pool = attach(&path).unwrap();
    assert_eq!(pool.size(), SIZE);
    assert_eq!(pool.path(), path.as_path());
    assert_eq!(std::fs::metadata(&path).unwrap().len(), SIZE);
}

#[test]
fn test_pool_create_rejects_existing_file() {
    let (_temp, path, pool) = setup_temp_pool();
    drop(pool);

    let result = Pool::create(&path, SIZE, LAYOUT, FlushMode::EveryCommit);
    assert!(matches!(result, Err(OpenError::Io(_))));
    // The existing pool is untouched
    assert!(attach(&path).is_ok());
}

#[test]
fn test_pool_create_size_bounds() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.pool");

    let result = Pool::create(&path, SIZE - 1, LAYOUT, FlushMode::EveryCommit);
    assert!(matches!(result, Err(OpenError::SizeTooSmall { .. })));
    assert!(!path.exists());

    let result = Pool::create(&path, u64::MAX, LAYOUT, FlushMode::EveryCommit);
    assert!(matches!(result, Err(OpenError::SizeTooLarge { .. })));
    assert!(!path.exists());
}

#[test]
fn test_pool_open_or_create() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.pool");

    let result = Pool::open_or_create(&path, 0, LAYOUT, FlushMode::EveryCommit);
    assert!(matches!(result, Err(OpenError::MissingPool(_))));

    let mut pool = Pool::open_or_create(&path, SIZE, LAYOUT, FlushMode::EveryCommit).unwrap();
    let block = scratch(&mut pool, 42);
    drop(pool);

    // A different requested size does not resize an existing pool
    let pool = Pool::open_or_create(&path, SIZE * 2, LAYOUT, FlushMode::EveryCommit).unwrap();
    assert_eq!(pool.size(), SIZE);
    assert_eq!(pool.read_u64(block).unwrap(), 42);
}

#[test]
fn test_pool_attach_rejects_other_layout() {
    let (_temp, path, pool) = setup_temp_pool();
    drop(pool);

    let result = Pool::attach(&path, "poolkv.other", FlushMode::EveryCommit);
    assert!(matches!(result, Err(OpenError::InvalidPool(_))));
}

#[test]
fn test_pool_attach_detects_header_corruption() {
    let (_temp, path, pool) = setup_temp_pool();
    drop(pool);

    // First byte of the serialized header body
    patch_file(&path, 8, &[0xFF]);

    let result = attach(&path);
    assert!(matches!(result, Err(OpenError::InvalidPool(_))));
}

#[test]
fn test_pool_attach_detects_truncated_file() {
    let (_temp, path, pool) = setup_temp_pool();
    drop(pool);

    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(SIZE / 2).unwrap();
    drop(file);

    let result = attach(&path);
    assert!(matches!(result, Err(OpenError::InvalidPool(_))));
}

#[test]
fn test_pool_attach_rejects_tiny_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("tiny.pool");
    std::fs::write(&path, b"not a pool").unwrap();

    let result = attach(&path);
    assert!(matches!(result, Err(OpenError::InvalidPool(_))));
}

// =============================================================================
// Transaction Tests
// =============================================================================

#[test]
fn test_pool_commit_persists() {
    let (_temp, path, mut pool) = setup_temp_pool();
    let block = scratch(&mut pool, 1);

    pool.transaction(|tx| tx.write_u64(block, 2)).unwrap();
    assert_eq!(pool.read_u64(block).unwrap(), 2);
    drop(pool);

    let pool = attach(&path).unwrap();
    assert_eq!(pool.root().unwrap(), block);
    assert_eq!(pool.read_u64(block).unwrap(), 2);
}

#[test]
fn test_pool_error_in_closure_rolls_back() {
    let (_temp, _path, mut pool) = setup_temp_pool();
    let block = scratch(&mut pool, 1);
    let heap_top = pool.heap_top().unwrap();

    let result: Result<(), PoolError> = pool.transaction(|tx| {
        tx.write_u64(block, 99)?;
        tx.write(block + 8, b"scribble")?;
        tx.alloc(1024)?;
        Err(PoolError::OutOfSpace)
    });

    assert!(matches!(result, Err(PoolError::OutOfSpace)));
    assert_eq!(pool.read_u64(block).unwrap(), 1);
    assert_eq!(pool.bytes(block + 8, 8).unwrap(), &[0u8; 8]);
    assert_eq!(pool.heap_top().unwrap(), heap_top);
}

#[test]
fn test_pool_transaction_sees_own_writes() {
    let (_temp, _path, mut pool) = setup_temp_pool();
    let block = scratch(&mut pool, 1);

    let seen = pool
        .transaction(|tx| {
            tx.write_u64(block, 5)?;
            tx.read_u64(block)
        })
        .unwrap();
    assert_eq!(seen, 5);
}

#[test]
fn test_pool_abort_rolls_back() {
    let (_temp, _path, mut pool) = setup_temp_pool();
    let block = scratch(&mut pool, 1);

    let mut tx = pool.begin();
    tx.write_u64(block, 7).unwrap();
    tx.write_u64(block, 8).unwrap();
    tx.abort().unwrap();

    assert_eq!(pool.read_u64(block).unwrap(), 1);
}

#[test]
fn test_pool_drop_uncommitted_rolls_back() {
    let (_temp, _path, mut pool) = setup_temp_pool();
    let block = scratch(&mut pool, 1);

    {
        let mut tx = pool.begin();
        tx.write_u64(block, 7).unwrap();
        tx.set_root(0).unwrap();
    }

    assert_eq!(pool.read_u64(block).unwrap(), 1);
    assert_eq!(pool.root().unwrap(), block);
}

// =============================================================================
// Crash Recovery Tests
// =============================================================================

#[test]
fn test_pool_recovers_interrupted_transaction() {
    let (_temp, path, mut pool) = setup_temp_pool();
    let block = scratch(&mut pool, 1);
    let heap_top = pool.heap_top().unwrap();

    // Simulate a crash: the transaction never commits nor rolls back
    let mut tx = pool.begin();
    tx.write_u64(block, 666).unwrap();
    tx.alloc(4096).unwrap();
    tx.set_root(0).unwrap();
    std::mem::forget(tx);
    drop(pool);

    let pool = attach(&path).unwrap();
    assert_eq!(pool.read_u64(block).unwrap(), 1);
    assert_eq!(pool.root().unwrap(), block);
    assert_eq!(pool.heap_top().unwrap(), heap_top);
}

#[test]
fn test_pool_ignores_torn_last_undo_entry() {
    let (_temp, path, mut pool) = setup_temp_pool();
    let block = scratch(&mut pool, 1);
    drop(pool);

    // A count of one with a garbage entry: the append was torn
    patch_file(&path, UNDO_COUNT_AT, &1u64.to_le_bytes());
    patch_file(&path, UNDO_COUNT_AT + 8, &[0x5A; 32]);

    let pool = attach(&path).unwrap();
    assert_eq!(pool.read_u64(block).unwrap(), 1);
}

#[test]
fn test_pool_rejects_damaged_undo_log() {
    let (_temp, path, pool) = setup_temp_pool();
    drop(pool);

    // A damaged entry followed by another one cannot be a torn append
    patch_file(&path, UNDO_COUNT_AT, &2u64.to_le_bytes());
    patch_file(&path, UNDO_COUNT_AT + 8, &[0x5A; 64]);

    let result = attach(&path);
    assert!(matches!(result, Err(OpenError::InvalidPool(_))));
}

// =============================================================================
// Allocator Tests
// =============================================================================

#[test]
fn test_pool_alloc_reuses_freed_block() {
    let (_temp, _path, mut pool) = setup_temp_pool();

    let first = pool.transaction(|tx| tx.alloc(100)).unwrap();
    pool.transaction(|tx| tx.free(first)).unwrap();
    let heap_top = pool.heap_top().unwrap();

    let second = pool.transaction(|tx| tx.alloc(100)).unwrap();
    assert_eq!(first, second);
    assert_eq!(pool.heap_top().unwrap(), heap_top);

    // Another size class comes from the heap top
    let third = pool.transaction(|tx| tx.alloc(1000)).unwrap();
    assert_ne!(third, first);
    assert!(pool.heap_top().unwrap() > heap_top);
}

#[test]
fn test_pool_rolled_back_free_keeps_block_allocated() {
    let (_temp, _path, mut pool) = setup_temp_pool();
    let block = pool.transaction(|tx| tx.alloc(100)).unwrap();

    let result: Result<(), PoolError> = pool.transaction(|tx| {
        tx.free(block)?;
        Err(PoolError::OutOfSpace)
    });
    assert!(result.is_err());

    // Still allocated, so a new allocation must not hand it out
    let other = pool.transaction(|tx| tx.alloc(100)).unwrap();
    assert_ne!(other, block);
    pool.transaction(|tx| tx.free(block)).unwrap();
}

#[test]
fn test_pool_block_recycled_within_transaction_rolls_back() {
    let (_temp, _path, mut pool) = setup_temp_pool();
    let block = pool
        .transaction(|tx| {
            let block = tx.alloc(100)?;
            tx.write_fresh(block, &[0xAB; 100])?;
            Ok(block)
        })
        .unwrap();

    // Free then reallocate the same block, overwrite it unlogged, and abort
    let mut tx = pool.begin();
    tx.free(block).unwrap();
    let again = tx.alloc(100).unwrap();
    assert_eq!(again, block);
    tx.write_fresh(again, &[0u8; 100]).unwrap();
    tx.abort().unwrap();

    assert_eq!(pool.bytes(block, 100).unwrap(), &[0xAB; 100][..]);
    let result = pool.transaction(|tx| tx.free(block));
    assert!(result.is_ok());
}

#[test]
fn test_pool_double_free_is_corruption() {
    let (_temp, _path, mut pool) = setup_temp_pool();
    let block = pool.transaction(|tx| tx.alloc(100)).unwrap();
    pool.transaction(|tx| tx.free(block)).unwrap();

    let result = pool.transaction(|tx| tx.free(block));
    assert!(matches!(result, Err(PoolError::Corrupted(_))));
}

#[test]
fn test_pool_free_outside_heap_is_corruption() {
    let (_temp, _path, mut pool) = setup_temp_pool();
    let result = pool.transaction(|tx| tx.free(16));
    assert!(matches!(result, Err(PoolError::Corrupted(_))));
}

#[test]
fn test_pool_alloc_exhaustion() {
    let (_temp, _path, mut pool) = setup_temp_pool();

    let mut blocks = 0;
    let err = loop {
        match pool.transaction(|tx| tx.alloc(1024 * 1024)) {
            Ok(_) => blocks += 1,
            Err(e) => break e,
        }
        assert!(blocks < 64, "heap never filled up");
    };

    assert!(matches!(err, PoolError::OutOfSpace));
    assert!(blocks > 0);
    assert!(pool.heap_top().unwrap() <= pool.size());

    // Smaller blocks still fit in the remainder
    assert!(pool.transaction(|tx| tx.alloc(64)).is_ok());
}

#[test]
fn test_pool_alloc_larger_than_pool() {
    let (_temp, _path, mut pool) = setup_temp_pool();
    let result = pool.transaction(|tx| tx.alloc(SIZE));
    assert!(matches!(result, Err(PoolError::OutOfSpace)));

    let result = pool.transaction(|tx| tx.alloc(u64::MAX));
    assert!(matches!(result, Err(PoolError::OutOfSpace)));
}

#[test]
fn test_pool_reads_are_bounds_checked() {
    let (_temp, _path, pool) = setup_temp_pool();
    assert!(matches!(pool.bytes(SIZE - 4, 8), Err(PoolError::Corrupted(_))));
    assert!(matches!(pool.bytes(u64::MAX, 2), Err(PoolError::Corrupted(_))));
}
