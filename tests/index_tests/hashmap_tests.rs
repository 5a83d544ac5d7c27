//! Tests for the hash index
//!
//! These tests verify:
//! - Basic put/get/exists/remove
//! - Linear growth past the initial bucket count
//! - Reopen after growth
//! - Scan visits every record once and honours Break
//! - Corruption of the root is detected on open

use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use poolkv::config::{FlushMode, MIN_POOL_SIZE};
use poolkv::error::PoolError;
use poolkv::index::{HashMapIndex, KvIndex};
use poolkv::pool::Pool;
use tempfile::TempDir;

const LAYOUT: &str = "poolkv.hashmap";

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_index() -> (TempDir, PathBuf, HashMapIndex) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.pool");
    let pool = Pool::create(&path, MIN_POOL_SIZE, LAYOUT, FlushMode::OnClose).unwrap();
    let index = HashMapIndex::open(pool).unwrap();
    (temp_dir, path, index)
}

fn reopen(path: &Path) -> Result<HashMapIndex, PoolError> {
    let pool = Pool::attach(path, LAYOUT, FlushMode::OnClose).unwrap();
    HashMapIndex::open(pool)
}

fn scan_all(index: &HashMapIndex) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut records = Vec::new();
    index
        .scan(&mut |key, value| {
            records.push((key.to_vec(), value.to_vec()));
            ControlFlow::Continue(())
        })
        .unwrap();
    records
}

fn key(i: u32) -> Vec<u8> {
    format!("key{}", i).into_bytes()
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_hashmap_empty() {
    let (_temp, _path, index) = setup_temp_index();
    assert_eq!(index.count().unwrap(), 0);
    assert_eq!(index.bucket_count().unwrap(), 1024);
    assert!(scan_all(&index).is_empty());
    assert!(!index.exists(b"").unwrap());
}

#[test]
fn test_hashmap_put_get_remove() {
    let (_temp, _path, mut index) = setup_temp_index();

    index.put(b"key1", b"value1").unwrap();
    index.put(b"key2", b"value2").unwrap();
    assert_eq!(index.get(b"key1").unwrap(), Some(b"value1".to_vec()));
    assert_eq!(index.count().unwrap(), 2);

    index.put(b"key1", b"other").unwrap();
    assert_eq!(index.get(b"key1").unwrap(), Some(b"other".to_vec()));
    assert_eq!(index.count().unwrap(), 2);

    assert!(index.remove(b"key1").unwrap());
    assert!(!index.remove(b"key1").unwrap());
    assert_eq!(index.get(b"key1").unwrap(), None);
    assert_eq!(index.count().unwrap(), 1);
}

#[test]
fn test_hashmap_keys_differing_in_nulls() {
    let (_temp, _path, mut index) = setup_temp_index();

    index.put(b"", b"empty").unwrap();
    index.put(b"\0", b"one-null").unwrap();
    index.put(b"\0\0", b"two-null").unwrap();

    assert_eq!(index.get(b"").unwrap(), Some(b"empty".to_vec()));
    assert_eq!(index.get(b"\0").unwrap(), Some(b"one-null".to_vec()));
    assert_eq!(index.get(b"\0\0").unwrap(), Some(b"two-null".to_vec()));
    assert_eq!(index.count().unwrap(), 3);
}

// =============================================================================
// Growth Tests
// =============================================================================

#[test]
fn test_hashmap_grows_past_initial_buckets() {
    let (_temp, _path, mut index) = setup_temp_index();

    for i in 0..10_000 {
        index.put(&key(i), &i.to_le_bytes()).unwrap();
    }

    assert_eq!(index.count().unwrap(), 10_000);
    assert!(index.bucket_count().unwrap() > 1024 * 4);
    for i in 0..10_000 {
        assert_eq!(index.get(&key(i)).unwrap(), Some(i.to_le_bytes().to_vec()));
    }
}

#[test]
fn test_hashmap_reopen_after_growth() {
    let (_temp, path, mut index) = setup_temp_index();
    for i in 0..5000 {
        index.put(&key(i), b"v").unwrap();
    }
    for i in (0..5000).step_by(2) {
        index.remove(&key(i)).unwrap();
    }
    let buckets = index.bucket_count().unwrap();
    drop(index);

    let index = reopen(&path).unwrap();
    assert_eq!(index.bucket_count().unwrap(), buckets);
    assert_eq!(index.count().unwrap(), 2500);
    assert!(index.exists(&key(4999)).unwrap());
    assert!(!index.exists(&key(4998)).unwrap());
}

// =============================================================================
// Scan Tests
// =============================================================================

#[test]
fn test_hashmap_scan_visits_every_record_once() {
    let (_temp, _path, mut index) = setup_temp_index();
    let mut expected = HashMap::new();
    for i in 0..3000 {
        index.put(&key(i), &i.to_le_bytes()).unwrap();
        expected.insert(key(i), i.to_le_bytes().to_vec());
    }

    let records = scan_all(&index);
    assert_eq!(records.len(), 3000);

    let unique: HashSet<_> = records.iter().map(|(k, _)| k.clone()).collect();
    assert_eq!(unique.len(), 3000);
    for (k, v) in records {
        assert_eq!(expected.get(&k), Some(&v));
    }
}

#[test]
fn test_hashmap_scan_order_is_stable() {
    let (_temp, path, mut index) = setup_temp_index();
    for i in 0..500 {
        index.put(&key(i), b"v").unwrap();
    }
    let first = scan_all(&index);
    assert_eq!(scan_all(&index), first);
    drop(index);

    let index = reopen(&path).unwrap();
    assert_eq!(scan_all(&index), first);
}

#[test]
fn test_hashmap_scan_stops_on_break() {
    let (_temp, _path, mut index) = setup_temp_index();
    for i in 0..100 {
        index.put(&key(i), b"v").unwrap();
    }

    let mut visited = 0;
    index
        .scan(&mut |_, _| {
            visited += 1;
            ControlFlow::Break(())
        })
        .unwrap();
    assert_eq!(visited, 1);
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_hashmap_open_detects_bad_root() {
    let (_temp, path, index) = setup_temp_index();
    drop(index);

    let mut pool = Pool::attach(&path, LAYOUT, FlushMode::OnClose).unwrap();
    let root = pool.root().unwrap();
    pool.transaction(|tx| tx.write_u64(root, 0)).unwrap();

    assert!(matches!(HashMapIndex::open(pool), Err(PoolError::Corrupted(_))));
}

#[test]
fn test_hashmap_open_detects_bad_geometry() {
    let (_temp, path, index) = setup_temp_index();
    drop(index);

    let mut pool = Pool::attach(&path, LAYOUT, FlushMode::OnClose).unwrap();
    let root = pool.root().unwrap();
    // Split pointer beyond the current level
    pool.transaction(|tx| tx.write_u64(root + 24, 5000)).unwrap();

    assert!(matches!(HashMapIndex::open(pool), Err(PoolError::Corrupted(_))));
}
