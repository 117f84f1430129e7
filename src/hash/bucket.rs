//! Bucket: a sorted block
//!
//! A fixed-capacity associative micro-structure serialized into exactly one
//! block. Entries are kept in ascending key order; offsets are implicit and
//! recomputed on every structural change.
//!
//! ## Block Layout
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ Header (8 bytes)                                     │
//! │   EntryCount u16 | BytesUsed u16 | LocalDepth u32    │
//! ├──────────────────────────────────────────────────────┤
//! │ Entries (contiguous, ascending key order)            │
//! │   [KeyLen u32][ValLen u32][Key][Value]               │
//! ├──────────────────────────────────────────────────────┤
//! │ Zero padding to the block size                       │
//! └──────────────────────────────────────────────────────┘
//! ```

use std::marker::PhantomData;

use bytes::{Buf, BufMut};

use crate::codec::Key;
use crate::error::{DiskMapError, Result};

use super::hash_key;

/// Header size: entry count (2) + bytes used (2) + local depth (4)
pub(crate) const BUCKET_HEADER_SIZE: usize = 8;

/// Per-entry overhead: key length (4) + value length (4)
pub(crate) const ENTRY_OVERHEAD: usize = 8;

/// One encoded key/value pair.
#[derive(Debug, Clone)]
struct Entry {
    key: Vec<u8>,
    value: Vec<u8>,
}

/// Sorted block of encoded entries, decoded into memory for manipulation.
#[derive(Debug, Clone)]
pub(crate) struct Bucket<K: Key> {
    local_depth: u32,
    entries: Vec<Entry>,
    capacity: usize,
    _marker: PhantomData<K>,
}

impl<K: Key> Bucket<K> {
    /// Fresh empty bucket.
    pub fn new(capacity: usize, local_depth: u32) -> Self {
        Self {
            local_depth,
            entries: Vec::new(),
            capacity,
            _marker: PhantomData,
        }
    }

    /// Decode a block image. The block length is the bucket capacity.
    pub fn decode(block: &[u8]) -> Result<Self> {
        let capacity = block.len();
        let mut buf = block;
        if buf.remaining() < BUCKET_HEADER_SIZE {
            return Err(DiskMapError::Corruption("Block smaller than bucket header".into()));
        }
        let count = buf.get_u16_le() as usize;
        let stored_used = buf.get_u16_le() as usize;
        let local_depth = buf.get_u32_le();

        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            if buf.remaining() < ENTRY_OVERHEAD {
                return Err(DiskMapError::Corruption(format!(
                    "Truncated entry header at index {i}"
                )));
            }
            let key_len = buf.get_u32_le() as usize;
            let val_len = buf.get_u32_le() as usize;
            if buf.remaining() < key_len + val_len {
                return Err(DiskMapError::Corruption(format!(
                    "Entry {i} overruns the block ({key_len}+{val_len} bytes claimed)"
                )));
            }
            let key = buf.copy_to_bytes(key_len).to_vec();
            let value = buf.copy_to_bytes(val_len).to_vec();
            entries.push(Entry { key, value });
        }

        let bucket = Self {
            local_depth,
            entries,
            capacity,
            _marker: PhantomData,
        };
        if bucket.used_bytes() != stored_used {
            return Err(DiskMapError::Corruption(format!(
                "Bucket byte accounting mismatch: header says {stored_used}, entries total {}",
                bucket.used_bytes()
            )));
        }
        Ok(bucket)
    }

    /// Serialize into a block image of exactly the bucket capacity.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.capacity);
        buf.put_u16_le(self.entries.len() as u16);
        buf.put_u16_le(self.used_bytes() as u16);
        buf.put_u32_le(self.local_depth);
        for entry in &self.entries {
            buf.put_u32_le(entry.key.len() as u32);
            buf.put_u32_le(entry.value.len() as u32);
            buf.put_slice(&entry.key);
            buf.put_slice(&entry.value);
        }
        debug_assert!(buf.len() <= self.capacity);
        buf.resize(self.capacity, 0);
        buf
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Binary search over the sorted entries. `Ok` holds the matching index,
    /// `Err` the insertion point.
    pub fn search(&self, key: &[u8]) -> Result<std::result::Result<usize, usize>> {
        let mut lo = 0usize;
        let mut hi = self.entries.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            match K::compare_encoded(&self.entries[mid].key, key)? {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Ok(Ok(mid)),
            }
        }
        Ok(Err(lo))
    }

    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.search(key)?.is_ok())
    }

    /// Encoded value for `key`, if present.
    pub fn get(&self, key: &[u8]) -> Result<Option<&[u8]>> {
        Ok(match self.search(key)? {
            Ok(i) => Some(self.entries[i].value.as_slice()),
            Err(_) => None,
        })
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Whether an entry of `key_len + val_len` payload bytes would fit.
    pub fn fits(&self, key_val_len: usize) -> bool {
        self.used_bytes() + ENTRY_OVERHEAD + key_val_len <= self.capacity
    }

    /// Insert or replace. Returns false (bucket unchanged) when the entry
    /// does not fit; the caller must split first.
    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<bool> {
        match self.search(&key)? {
            Ok(i) => {
                let new_used =
                    self.used_bytes() - self.entries[i].value.len() + value.len();
                if new_used > self.capacity {
                    return Ok(false);
                }
                self.entries[i].value = value;
                Ok(true)
            }
            Err(i) => {
                if !self.fits(key.len() + value.len()) {
                    return Ok(false);
                }
                self.entries.insert(i, Entry { key, value });
                Ok(true)
            }
        }
    }

    /// Remove `key`, returning its encoded value.
    pub fn remove(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(match self.search(key)? {
            Ok(i) => Some(self.entries.remove(i).value),
            Err(_) => None,
        })
    }

    // =========================================================================
    // Split / Merge
    // =========================================================================

    /// Partition entries by the hash bit at the current local depth: clear
    /// stays here, set moves to the returned bucket. Both local depths are
    /// incremented. Purely in-memory; the caller persists both sides.
    pub fn split(&mut self) -> Bucket<K> {
        let bit = self.local_depth;
        let (stay, moved): (Vec<Entry>, Vec<Entry>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| (hash_key(&e.key) >> bit) & 1 == 0);

        self.entries = stay;
        self.local_depth += 1;
        Bucket {
            local_depth: self.local_depth,
            entries: moved,
            capacity: self.capacity,
            _marker: PhantomData,
        }
    }

    /// Serialized size of this bucket combined with a buddy.
    pub fn merged_size(&self, other: &Bucket<K>) -> usize {
        self.used_bytes() + other.used_bytes() - BUCKET_HEADER_SIZE
    }

    /// Absorb a buddy bucket's entries (disjoint key sets, both sorted) and
    /// drop one level of local depth. Caller checks `merged_size` first.
    pub fn merge_from(&mut self, other: Bucket<K>) -> Result<()> {
        debug_assert_eq!(self.local_depth, other.local_depth);
        let left = std::mem::take(&mut self.entries);
        let mut merged = Vec::with_capacity(left.len() + other.entries.len());

        let mut a = left.into_iter().peekable();
        let mut b = other.entries.into_iter().peekable();
        loop {
            match (a.peek(), b.peek()) {
                (Some(x), Some(y)) => {
                    if K::compare_encoded(&x.key, &y.key)? == std::cmp::Ordering::Less {
                        merged.push(a.next().unwrap());
                    } else {
                        merged.push(b.next().unwrap());
                    }
                }
                (Some(_), None) => merged.push(a.next().unwrap()),
                (None, Some(_)) => merged.push(b.next().unwrap()),
                (None, None) => break,
            }
        }

        self.entries = merged;
        self.local_depth -= 1;
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn local_depth(&self) -> u32 {
        self.local_depth
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Header plus entry bytes currently in use.
    pub fn used_bytes(&self) -> usize {
        BUCKET_HEADER_SIZE
            + self
                .entries
                .iter()
                .map(|e| ENTRY_OVERHEAD + e.key.len() + e.value.len())
                .sum::<usize>()
    }

    /// Consume the bucket, yielding its encoded entries in key order.
    pub fn into_entries(self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.entries.into_iter().map(|e| (e.key, e.value)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::to_bytes;

    fn bucket(capacity: usize) -> Bucket<u64> {
        Bucket::new(capacity, 0)
    }

    fn put(b: &mut Bucket<u64>, key: u64, value: &str) -> bool {
        b.insert(to_bytes(&key), value.as_bytes().to_vec()).unwrap()
    }

    #[test]
    fn test_insert_keeps_sorted_order() {
        let mut b = bucket(512);
        for key in [5u64, 1, 9, 3, 7] {
            assert!(put(&mut b, key, "x"));
        }

        let keys: Vec<u64> = b
            .into_entries()
            .into_iter()
            .map(|(k, _)| u64::from_be_bytes(k.try_into().unwrap()))
            .collect();
        assert_eq!(keys, vec![1, 3, 5, 7, 9]);
    }

    #[test]
    fn test_get_and_replace() {
        let mut b = bucket(512);
        put(&mut b, 42, "first");
        assert!(put(&mut b, 42, "second"));

        assert_eq!(b.len(), 1);
        assert_eq!(b.get(&to_bytes(&42u64)).unwrap(), Some(b"second".as_ref()));
        assert_eq!(b.get(&to_bytes(&43u64)).unwrap(), None);
    }

    #[test]
    fn test_remove_compacts() {
        let mut b = bucket(512);
        put(&mut b, 1, "a");
        put(&mut b, 2, "b");
        put(&mut b, 3, "c");
        let before = b.used_bytes();

        let removed = b.remove(&to_bytes(&2u64)).unwrap();
        assert_eq!(removed, Some(b"b".to_vec()));
        assert_eq!(b.len(), 2);
        assert!(b.used_bytes() < before);
        assert_eq!(b.remove(&to_bytes(&2u64)).unwrap(), None);
    }

    #[test]
    fn test_insert_refuses_when_full() {
        // Each entry is 8 overhead + 8 key + 2 value = 18 bytes; after the
        // 8-byte header a 44-byte bucket fits exactly two
        let mut b = bucket(44);
        assert!(put(&mut b, 1, "aa"));
        assert!(put(&mut b, 2, "bb"));
        assert!(!put(&mut b, 3, "cc"));
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let mut b = bucket(256);
        put(&mut b, 10, "ten");
        put(&mut b, 20, "twenty");
        let block = b.encode();
        assert_eq!(block.len(), 256);

        let decoded: Bucket<u64> = Bucket::decode(&block).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded.local_depth(), 0);
        assert_eq!(decoded.get(&to_bytes(&20u64)).unwrap(), Some(b"twenty".as_ref()));
    }

    #[test]
    fn test_decode_rejects_overrunning_entry() {
        let mut block = vec![0u8; 64];
        block[0] = 1; // one entry
        block[4] = 0; // local depth 0
        // entry header claims a 1000-byte key
        block[8..12].copy_from_slice(&1000u32.to_le_bytes());

        assert!(matches!(
            Bucket::<u64>::decode(&block),
            Err(DiskMapError::Corruption(_))
        ));
    }

    #[test]
    fn test_split_partitions_by_depth_bit() {
        let mut b = bucket(4096);
        for key in 0u64..32 {
            put(&mut b, key, "v");
        }
        let total = b.len();

        let moved = b.split();
        assert_eq!(b.local_depth(), 1);
        assert_eq!(moved.local_depth(), 1);
        assert_eq!(b.len() + moved.len(), total);

        // Every stayed key has hash bit 0 clear, every moved key has it set
        for (k, _) in b.clone().into_entries() {
            assert_eq!(hash_key(&k) & 1, 0);
        }
        for (k, _) in moved.into_entries() {
            assert_eq!(hash_key(&k) & 1, 1);
        }
    }

    #[test]
    fn test_merge_restores_split() {
        let mut b = bucket(4096);
        for key in 0u64..16 {
            put(&mut b, key, "v");
        }
        let moved = b.split();

        assert!(b.merged_size(&moved) <= 4096);
        b.merge_from(moved).unwrap();
        assert_eq!(b.local_depth(), 0);
        assert_eq!(b.len(), 16);

        let keys: Vec<u64> = b
            .into_entries()
            .into_iter()
            .map(|(k, _)| u64::from_be_bytes(k.try_into().unwrap()))
            .collect();
        let expected: Vec<u64> = (0..16).collect();
        assert_eq!(keys, expected);
    }
}
