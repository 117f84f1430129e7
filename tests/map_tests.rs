//! Tests for DiskMap
//!
//! These tests verify:
//! - Round-trip get/put/remove semantics
//! - Overwrite idempotence
//! - Bucket splitting and directory doubling under insert pressure
//! - Oversized entry rejection
//! - Iteration over all entries
//! - Optional buddy merging and directory collapse on delete

use std::collections::HashMap;

use diskmap::{Bin, Config, DiskMap, DiskMapError, IoBackend};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

/// Map with room to spare: nothing splits unless a test insists.
fn setup_map(temp: &TempDir) -> DiskMap<u64, String> {
    let config = Config::builder()
        .path(temp.path().join("test.db"))
        .bucket_size(4096)
        .max_buckets(64)
        .max_depth(8)
        .build();
    DiskMap::create(config).unwrap()
}

/// Tiny buckets: an 80-byte bucket holds exactly four u32→u32 entries after
/// the 8-byte header, and the entry-size limit (bucket_size / 10 = 8 bytes)
/// admits them exactly.
fn tiny_bucket_config(temp: &TempDir) -> Config {
    Config::builder()
        .path(temp.path().join("tiny.db"))
        .bucket_size(80)
        .max_buckets(128)
        .max_depth(10)
        .build()
}

// =============================================================================
// Basic Operations
// =============================================================================

#[test]
fn test_put_get_round_trip() {
    let temp = TempDir::new().unwrap();
    let map = setup_map(&temp);

    map.put(&1, &"one".to_string()).unwrap();
    map.put(&2, &"two".to_string()).unwrap();

    assert_eq!(map.get(&1).unwrap(), Some("one".to_string()));
    assert_eq!(map.get(&2).unwrap(), Some("two".to_string()));
    assert_eq!(map.get(&3).unwrap(), None);
    assert_eq!(map.len(), 2);
}

#[test]
fn test_overwrite_is_idempotent_for_size() {
    let temp = TempDir::new().unwrap();
    let map = setup_map(&temp);

    map.put(&7, &"first".to_string()).unwrap();
    let size_after_one = map.len();
    map.put(&7, &"second, and longer than before".to_string()).unwrap();

    assert_eq!(map.len(), size_after_one);
    assert_eq!(map.get(&7).unwrap(), Some("second, and longer than before".to_string()));
}

#[test]
fn test_contains_key() {
    let temp = TempDir::new().unwrap();
    let map = setup_map(&temp);

    map.put(&42, &"answer".to_string()).unwrap();

    assert!(map.contains_key(&42).unwrap());
    assert!(!map.contains_key(&43).unwrap());
}

#[test]
fn test_remove() {
    let temp = TempDir::new().unwrap();
    let map = setup_map(&temp);

    map.put(&1, &"one".to_string()).unwrap();
    map.put(&2, &"two".to_string()).unwrap();

    assert_eq!(map.remove(&1).unwrap(), Some("one".to_string()));
    assert_eq!(map.len(), 1);
    assert_eq!(map.get(&1).unwrap(), None);
    assert!(!map.contains_key(&1).unwrap());

    // Removing an absent key returns None and changes nothing
    assert_eq!(map.remove(&99).unwrap(), None);
    assert_eq!(map.len(), 1);
}

#[test]
fn test_put_if_absent() {
    let temp = TempDir::new().unwrap();
    let map = setup_map(&temp);

    assert!(map.put_if_absent(&5, &"kept".to_string()).unwrap());
    assert!(!map.put_if_absent(&5, &"ignored".to_string()).unwrap());

    assert_eq!(map.get(&5).unwrap(), Some("kept".to_string()));
    assert_eq!(map.len(), 1);
}

#[test]
fn test_is_empty() {
    let temp = TempDir::new().unwrap();
    let map = setup_map(&temp);

    assert!(map.is_empty());
    map.put(&1, &"x".to_string()).unwrap();
    assert!(!map.is_empty());
    map.remove(&1).unwrap();
    assert!(map.is_empty());
}

// =============================================================================
// Entry Size Limit
// =============================================================================

#[test]
fn test_oversized_entry_rejected_before_mutation() {
    let temp = TempDir::new().unwrap();
    let map: DiskMap<u32, String> = DiskMap::create(tiny_bucket_config(&temp)).unwrap();

    // 4 key bytes + 20 value bytes, limit is 80 / 10 = 8
    let result = map.put(&1, &"far too large a value".to_string());
    assert!(matches!(
        result,
        Err(DiskMapError::KeyValueTooLarge { size: 25, limit: 8 })
    ));
    assert_eq!(map.len(), 0);
    assert_eq!(map.max_entry_size(), 8);
}

// =============================================================================
// Splitting
// =============================================================================

#[test]
fn test_fifth_entry_forces_a_split() {
    let temp = TempDir::new().unwrap();
    let map: DiskMap<u32, u32> = DiskMap::create(tiny_bucket_config(&temp)).unwrap();

    for key in 1u32..=4 {
        map.put(&key, &(key * 10)).unwrap();
    }
    assert_eq!(map.bucket_count(), 1);
    assert_eq!(map.depth(), 0);

    map.put(&5, &50).unwrap();

    assert_eq!(map.len(), 5);
    assert!(map.depth() >= 1);
    assert!(map.bucket_count() >= 2);

    // Every entry is still reachable through the rewritten directory
    for key in 1u32..=5 {
        assert_eq!(map.get(&key).unwrap(), Some(key * 10), "key {key} lost in split");
    }
}

#[test]
fn test_split_correctness_under_sustained_inserts() {
    let temp = TempDir::new().unwrap();
    let map: DiskMap<u32, u32> = DiskMap::create(tiny_bucket_config(&temp)).unwrap();

    for key in 0u32..200 {
        map.put(&key, &(key * 3)).unwrap();
    }

    assert_eq!(map.len(), 200);
    assert!(map.depth() >= 1);
    for key in 0u32..200 {
        assert_eq!(map.get(&key).unwrap(), Some(key * 3));
    }
}

#[test]
fn test_overwrites_during_splits_keep_size_stable() {
    let temp = TempDir::new().unwrap();
    let map: DiskMap<u32, u32> = DiskMap::create(tiny_bucket_config(&temp)).unwrap();

    for key in 0u32..50 {
        map.put(&key, &0).unwrap();
    }
    for key in 0u32..50 {
        map.put(&key, &(key + 1)).unwrap();
    }

    assert_eq!(map.len(), 50);
    for key in 0u32..50 {
        assert_eq!(map.get(&key).unwrap(), Some(key + 1));
    }
}

// =============================================================================
// Iteration
// =============================================================================

#[test]
fn test_iterator_yields_every_entry_once() {
    let temp = TempDir::new().unwrap();
    let map: DiskMap<u32, u32> = DiskMap::create(tiny_bucket_config(&temp)).unwrap();

    for key in 0u32..100 {
        map.put(&key, &(key + 1000)).unwrap();
    }

    let collected: HashMap<u32, u32> = map.iter().map(|r| r.unwrap()).collect();
    assert_eq!(collected.len(), 100);
    for key in 0u32..100 {
        assert_eq!(collected[&key], key + 1000);
    }
}

#[test]
fn test_iterator_on_empty_map() {
    let temp = TempDir::new().unwrap();
    let map = setup_map(&temp);

    assert_eq!(map.iter().count(), 0);
}

// =============================================================================
// Structured Values
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Session {
    user: String,
    logins: u32,
}

#[test]
fn test_structured_values_through_bincode_codec() {
    let temp = TempDir::new().unwrap();
    let map: DiskMap<u64, Bin<Session>> = DiskMap::create(
        Config::builder()
            .path(temp.path().join("sessions.db"))
            .bucket_size(4096)
            .max_buckets(64)
            .max_depth(8)
            .build(),
    )
    .unwrap();

    let session = Session {
        user: "ada".to_string(),
        logins: 3,
    };
    map.put(&1, &Bin(session.clone())).unwrap();

    let restored = map.get(&1).unwrap().unwrap().into_inner();
    assert_eq!(restored, session);
}

// =============================================================================
// Memory-Mapped Backend
// =============================================================================

#[test]
fn test_map_operations_over_mmap_backend() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .path(temp.path().join("mapped.db"))
        .bucket_size(80)
        .max_buckets(128)
        .max_depth(10)
        .io_backend(IoBackend::Mmap)
        .build();
    let map: DiskMap<u32, u32> = DiskMap::create(config).unwrap();

    for key in 0u32..100 {
        map.put(&key, &(key * 7)).unwrap();
    }
    map.remove(&50).unwrap();

    assert_eq!(map.len(), 99);
    assert_eq!(map.get(&50).unwrap(), None);
    for key in (0u32..100).filter(|&k| k != 50) {
        assert_eq!(map.get(&key).unwrap(), Some(key * 7));
    }
}

// =============================================================================
// Merge on Delete
// =============================================================================

#[test]
fn test_deletes_shrink_directory_when_merging_enabled() {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .path(temp.path().join("merging.db"))
        .bucket_size(80)
        .max_buckets(128)
        .max_depth(10)
        .merge_on_delete(true)
        .build();
    let map: DiskMap<u32, u32> = DiskMap::create(config).unwrap();

    for key in 0u32..60 {
        map.put(&key, &key).unwrap();
    }
    let grown_depth = map.depth();
    let grown_buckets = map.bucket_count();
    assert!(grown_depth >= 2);
    assert!(grown_buckets >= 4);

    for key in 0u32..60 {
        map.remove(&key).unwrap();
    }

    assert_eq!(map.len(), 0);
    assert!(map.depth() < grown_depth, "directory never collapsed");
    assert!(map.bucket_count() < grown_buckets, "no bucket was reclaimed");

    // The shrunken map still works
    map.put(&7, &77).unwrap();
    assert_eq!(map.get(&7).unwrap(), Some(77));
}

#[test]
fn test_deletes_never_shrink_by_default() {
    let temp = TempDir::new().unwrap();
    let map: DiskMap<u32, u32> = DiskMap::create(tiny_bucket_config(&temp)).unwrap();

    for key in 0u32..60 {
        map.put(&key, &key).unwrap();
    }
    let grown_depth = map.depth();
    let grown_buckets = map.bucket_count();

    for key in 0u32..60 {
        map.remove(&key).unwrap();
    }

    assert_eq!(map.len(), 0);
    assert_eq!(map.depth(), grown_depth);
    assert_eq!(map.bucket_count(), grown_buckets);
}
