//! DiskMap: a disk-backed hash map
//!
//! The orchestrator over the block store, the directory, and the sorted
//! bucket blocks: computes addresses, routes lookups, and runs the split,
//! directory-doubling and (optional) buddy-merge algorithms.
//!
//! ## Concurrency Model
//!
//! One exclusive lock per open map guards the whole (directory, store) pair.
//! Every operation holds it for its full duration: splits and merges are
//! multi-step sequences, and a reader observing the directory mid-split
//! would resolve addresses against an inconsistent mapping.
//!
//! ## Durability Contract
//!
//! Bucket blocks are written through on every mutation. Table metadata
//! (element count + directory) reaches disk at create, split, merge and
//! `save`/`close`. A map dropped without `save` reopens with the directory
//! and count as of the last metadata write; only a completed `save` makes
//! the full state durable.

use std::collections::VecDeque;
use std::marker::PhantomData;

use bytes::{Buf, BufMut};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::codec::{to_bytes, Key, Value};
use crate::config::{Config, MAX_DIRECTORY_DEPTH};
use crate::error::{DiskMapError, Result};
use crate::store::BlockStore;

use super::bucket::Bucket;
use super::directory::Directory;
use super::hash_key;

// =============================================================================
// Table Metadata Constants
// =============================================================================

/// Current table metadata version
const TABLE_VERSION: u32 = 1;

/// An entry's key+value payload may use at most bucket_size / this divisor.
/// Larger entries are rejected up front: they would never fit, even alone
/// after repeated splits.
const ENTRY_SIZE_DIVISOR: u32 = 10;

/// Fixed metadata fields: table_version + bucket_size + max_kv_size +
/// num_elements, each u32.
const METADATA_FIXED_SIZE: usize = 16;

/// Reserved-region bytes needed for a directory of the given depth, CRC
/// trailer included.
fn metadata_capacity(depth: u32) -> u32 {
    METADATA_FIXED_SIZE as u32 + 8 + 4 * (1u32 << depth) + 4
}

/// Largest depth whose metadata fits in a reserved region of this size.
fn max_depth_for(reserved_bytes: u32) -> u32 {
    let mut depth = 0;
    while depth < MAX_DIRECTORY_DEPTH && metadata_capacity(depth + 1) <= reserved_bytes {
        depth += 1;
    }
    depth
}

enum PutOutcome {
    Inserted,
    Replaced,
    Skipped,
}

// =============================================================================
// DiskMap
// =============================================================================

/// Disk-backed associative container using extendible hashing.
///
/// Keys and values move through the [`Key`]/[`Value`] codecs; on disk the map
/// is a single block file holding sorted bucket blocks plus a persisted
/// directory in the file's reserved region.
pub struct DiskMap<K: Key, V: Value> {
    inner: Mutex<Core<K>>,
    _marker: PhantomData<V>,
}

/// Lock-guarded state: everything an operation may touch.
struct Core<K: Key> {
    store: BlockStore,
    directory: Directory,
    num_elements: u32,
    max_kv_size: u32,
    max_depth: u32,
    merge_on_delete: bool,
    _marker: PhantomData<K>,
}

impl<K: Key, V: Value> DiskMap<K, V> {
    /// Create a new map file.
    ///
    /// Lays out the block store (`block_size == bucket_size`, reserved
    /// region sized for a directory of `max_depth`), allocates the initial
    /// empty bucket, and persists the depth-0 directory.
    pub fn create(config: Config) -> Result<Self> {
        config.validate()?;

        let reserved = metadata_capacity(config.max_depth);
        let mut store = BlockStore::create(
            &config.path,
            config.bucket_size,
            config.max_buckets,
            reserved,
            config.io_backend,
        )?;

        let initial: Bucket<K> = Bucket::new(config.bucket_size as usize, 0);
        let id = store.insert(&initial.encode())?;

        let mut core = Core {
            store,
            directory: Directory::new(id),
            num_elements: 0,
            max_kv_size: config.bucket_size / ENTRY_SIZE_DIVISOR,
            max_depth: config.max_depth,
            merge_on_delete: config.merge_on_delete,
            _marker: PhantomData,
        };
        core.write_metadata()?;
        core.store.save()?;

        debug!(
            path = %config.path.display(),
            bucket_size = config.bucket_size,
            max_buckets = config.max_buckets,
            "created map"
        );

        Ok(Self {
            inner: Mutex::new(core),
            _marker: PhantomData,
        })
    }

    /// Open an existing map file.
    ///
    /// The block file's magic marker and the table metadata version are
    /// validated before any other field is trusted; geometry comes from the
    /// file, runtime options (`io_backend`, `merge_on_delete`) from `config`.
    pub fn open(config: Config) -> Result<Self> {
        let mut store = BlockStore::open(&config.path, config.io_backend)?;
        let reserved = store.read_reserved()?;

        if reserved.len() < METADATA_FIXED_SIZE {
            return Err(DiskMapError::Format(
                "Reserved region too small for table metadata".into(),
            ));
        }
        let version = u32::from_le_bytes(reserved[0..4].try_into().unwrap());
        if version != TABLE_VERSION {
            return Err(DiskMapError::Format(format!(
                "Unsupported table version {version} (expected {TABLE_VERSION})"
            )));
        }

        let mut buf = &reserved[4..];
        let bucket_size = buf.get_u32_le();
        let max_kv_size = buf.get_u32_le();
        let num_elements = buf.get_u32_le();
        let directory = Directory::decode(&mut buf)?;

        let payload_len = METADATA_FIXED_SIZE + directory.encoded_size();
        if reserved.len() < payload_len + 4 {
            return Err(DiskMapError::Corruption("Truncated table metadata".into()));
        }
        let stored_crc =
            u32::from_le_bytes(reserved[payload_len..payload_len + 4].try_into().unwrap());
        let actual_crc = crc32fast::hash(&reserved[..payload_len]);
        if stored_crc != actual_crc {
            return Err(DiskMapError::Corruption(format!(
                "Table metadata checksum mismatch: stored {stored_crc:#x}, computed {actual_crc:#x}"
            )));
        }

        if bucket_size != store.block_size() {
            return Err(DiskMapError::Format(format!(
                "Table bucket_size {} disagrees with block size {}",
                bucket_size,
                store.block_size()
            )));
        }

        let max_depth = max_depth_for(store.reserved_size());
        debug!(
            path = %config.path.display(),
            num_elements,
            depth = directory.depth(),
            slots = directory.len(),
            "opened map"
        );

        Ok(Self {
            inner: Mutex::new(Core {
                store,
                directory,
                num_elements,
                max_kv_size,
                max_depth,
                merge_on_delete: config.merge_on_delete,
                _marker: PhantomData,
            }),
            _marker: PhantomData,
        })
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Get the value stored under `key`.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let encoded_key = to_bytes(key);
        let mut core = self.inner.lock();
        let (_, bucket) = core.bucket_for(&encoded_key)?;
        match bucket.get(&encoded_key)? {
            Some(bytes) => V::decode(bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &K) -> Result<bool> {
        let encoded_key = to_bytes(key);
        let mut core = self.inner.lock();
        let (_, bucket) = core.bucket_for(&encoded_key)?;
        bucket.contains(&encoded_key)
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Insert or overwrite.
    pub fn put(&self, key: &K, value: &V) -> Result<()> {
        let encoded_key = to_bytes(key);
        let encoded_value = to_bytes(value);
        let mut core = self.inner.lock();
        core.put_encoded(encoded_key, encoded_value, true)?;
        Ok(())
    }

    /// Insert only when absent. Returns true if the value was stored.
    pub fn put_if_absent(&self, key: &K, value: &V) -> Result<bool> {
        let encoded_key = to_bytes(key);
        let encoded_value = to_bytes(value);
        let mut core = self.inner.lock();
        match core.put_encoded(encoded_key, encoded_value, false)? {
            PutOutcome::Skipped => Ok(false),
            _ => Ok(true),
        }
    }

    /// Remove `key`, returning its previous value.
    pub fn remove(&self, key: &K) -> Result<Option<V>> {
        let encoded_key = to_bytes(key);
        let mut core = self.inner.lock();
        match core.remove_encoded(&encoded_key)? {
            Some(bytes) => V::decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    /// Lazy single-pass iterator over all entries, in bucket block order —
    /// not globally key-sorted. Holds the map's lock for its lifetime, so no
    /// structural mutation can run while it is alive.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            core: self.inner.lock(),
            next_id: 0,
            pending: VecDeque::new(),
            _marker: PhantomData,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Flush table metadata and all store state to disk.
    pub fn save(&self) -> Result<()> {
        let mut core = self.inner.lock();
        core.write_metadata()?;
        core.store.save()
    }

    /// Save, then drop the map.
    pub fn close(self) -> Result<()> {
        let mut core = self.inner.into_inner();
        core.write_metadata()?;
        core.store.save()
    }

    /// Remove the backing file entirely.
    pub fn destroy(self) -> Result<()> {
        self.inner.into_inner().store.destroy()
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Number of entries in the map.
    pub fn len(&self) -> usize {
        self.inner.lock().num_elements as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current directory depth (the directory holds `2^depth` slots).
    pub fn depth(&self) -> u32 {
        self.inner.lock().directory.depth()
    }

    /// Number of live bucket blocks.
    pub fn bucket_count(&self) -> u32 {
        self.inner.lock().store.live_blocks()
    }

    /// Largest admissible key+value payload in bytes.
    pub fn max_entry_size(&self) -> usize {
        self.inner.lock().max_kv_size as usize
    }
}

// =============================================================================
// Core Algorithms
// =============================================================================

impl<K: Key> Core<K> {
    fn load_bucket(&mut self, id: u32) -> Result<Bucket<K>> {
        let block = self.store.get(id)?.ok_or_else(|| {
            DiskMapError::Corruption(format!("Directory references free block {id}"))
        })?;
        Bucket::decode(&block)
    }

    fn bucket_for(&mut self, encoded_key: &[u8]) -> Result<(u32, Bucket<K>)> {
        let addr = self.directory.address(hash_key(encoded_key));
        let id = self.directory.slot(addr);
        Ok((id, self.load_bucket(id)?))
    }

    fn put_encoded(
        &mut self,
        encoded_key: Vec<u8>,
        encoded_value: Vec<u8>,
        overwrite: bool,
    ) -> Result<PutOutcome> {
        let payload = encoded_key.len() + encoded_value.len();
        if payload > self.max_kv_size as usize {
            return Err(DiskMapError::KeyValueTooLarge {
                size: payload,
                limit: self.max_kv_size as usize,
            });
        }
        let hash = hash_key(&encoded_key);

        // Split-and-retry is a bounded loop: each pass deepens the target
        // bucket by one address bit, and depth cannot pass max_depth.
        for _ in 0..=self.max_depth {
            let addr = self.directory.address(hash);
            let id = self.directory.slot(addr);
            let mut bucket = self.load_bucket(id)?;

            // Delete-then-reinsert keeps the byte accounting correct when
            // overwriting with a different-sized value.
            let prior = bucket.remove(&encoded_key)?;
            if prior.is_some() && !overwrite {
                return Ok(PutOutcome::Skipped);
            }

            if bucket.fits(payload) {
                bucket.insert(encoded_key, encoded_value)?;
                self.store.update(id, &bucket.encode())?;
                return Ok(if prior.is_some() {
                    PutOutcome::Replaced
                } else {
                    self.num_elements += 1;
                    trace!(bucket = id, "inserted entry");
                    PutOutcome::Inserted
                });
            }

            // Restore the displaced entry so redistribution keeps it.
            if let Some(previous_value) = prior {
                bucket.insert(encoded_key.clone(), previous_value)?;
            }
            self.split(hash, id, bucket)?;
        }
        Err(DiskMapError::OutOfSpace(
            "Bucket cannot be split further".into(),
        ))
    }

    /// Split the bucket at `id`, doubling the directory first when its local
    /// depth has caught up with the global depth.
    fn split(&mut self, hash: u32, id: u32, mut bucket: Bucket<K>) -> Result<()> {
        let local = bucket.local_depth();
        if local == self.directory.depth() {
            if self.directory.depth() >= self.max_depth {
                return Err(DiskMapError::OutOfSpace(format!(
                    "Directory at maximum depth {}",
                    self.max_depth
                )));
            }
            self.directory.double();
            debug!(depth = self.directory.depth(), "doubled directory");
        }

        let moved = bucket.split();
        let new_id = self.store.insert(&moved.encode())?;

        // The old bucket's slot run, computed against its stale local depth,
        // splits in half: the upper half now belongs to the new bucket.
        let addr = self.directory.address(hash);
        let range = self.directory.range_of(addr, local);
        let half = range.len() / 2;
        self.directory.assign_range(range.start + half..range.end, new_id);

        self.store.update(id, &bucket.encode())?;
        self.write_metadata()?;

        debug!(
            old_bucket = id,
            new_bucket = new_id,
            local_depth = local + 1,
            entries_moved = moved.len(),
            "split bucket"
        );
        Ok(())
    }

    fn remove_encoded(&mut self, encoded_key: &[u8]) -> Result<Option<Vec<u8>>> {
        let hash = hash_key(encoded_key);
        let addr = self.directory.address(hash);
        let id = self.directory.slot(addr);
        let mut bucket = self.load_bucket(id)?;

        let Some(prior) = bucket.remove(encoded_key)? else {
            return Ok(None);
        };
        self.store.update(id, &bucket.encode())?;
        self.num_elements -= 1;
        trace!(bucket = id, "removed entry");

        if self.merge_on_delete {
            self.merge_chain(hash)?;
        }
        Ok(Some(prior))
    }

    /// Repeatedly combine the addressed bucket with its buddy while both
    /// share a local depth and their entries fit one block, collapsing the
    /// directory whenever it becomes fully redundant. A collapse can expose
    /// the next buddy, so the loop re-derives the address each pass; it is
    /// bounded by the directory depth.
    fn merge_chain(&mut self, hash: u32) -> Result<()> {
        let mut changed = false;
        loop {
            if self.directory.depth() == 0 {
                break;
            }
            let addr = self.directory.address(hash);
            let id = self.directory.slot(addr);
            let bucket = self.load_bucket(id)?;
            let local = bucket.local_depth();
            if local == 0 {
                break;
            }

            // The parent range spans this bucket and its buddy.
            let parent = self.directory.range_of(addr, local - 1);
            let upper_start = parent.start + parent.len() / 2;
            let buddy_addr = if addr < upper_start {
                upper_start
            } else {
                parent.start
            };
            let buddy_id = self.directory.slot(buddy_addr);
            if buddy_id == id {
                break;
            }
            let buddy = self.load_bucket(buddy_id)?;
            if buddy.local_depth() != local {
                break;
            }
            if bucket.merged_size(&buddy) > self.store.block_size() as usize {
                break;
            }

            // The bucket covering the lower half survives.
            let (mut survivor, absorbed, survivor_id, freed_id) = if addr < upper_start {
                (bucket, buddy, id, buddy_id)
            } else {
                (buddy, bucket, buddy_id, id)
            };
            survivor.merge_from(absorbed)?;
            self.store.update(survivor_id, &survivor.encode())?;
            self.directory.assign_range(parent, survivor_id);
            self.store.delete(freed_id)?;

            while self.directory.is_fully_redundant() {
                self.directory.collapse();
            }
            changed = true;
            debug!(
                survivor = survivor_id,
                freed = freed_id,
                depth = self.directory.depth(),
                "merged buddy buckets"
            );
        }
        if changed {
            self.write_metadata()?;
        }
        Ok(())
    }

    fn write_metadata(&mut self) -> Result<()> {
        let mut buf = Vec::with_capacity(METADATA_FIXED_SIZE + self.directory.encoded_size() + 4);
        buf.put_u32_le(TABLE_VERSION);
        buf.put_u32_le(self.store.block_size());
        buf.put_u32_le(self.max_kv_size);
        buf.put_u32_le(self.num_elements);
        self.directory.encode(&mut buf);
        let crc = crc32fast::hash(&buf);
        buf.put_u32_le(crc);
        self.store.write_reserved(&buf)
    }
}

// =============================================================================
// Iterator
// =============================================================================

/// Iterator over all `(key, value)` pairs, in bucket block order.
pub struct Iter<'a, K: Key, V: Value> {
    core: MutexGuard<'a, Core<K>>,
    next_id: u32,
    pending: VecDeque<(Vec<u8>, Vec<u8>)>,
    _marker: PhantomData<V>,
}

impl<K: Key, V: Value> Iterator for Iter<'_, K, V> {
    type Item = Result<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((encoded_key, encoded_value)) = self.pending.pop_front() {
                let pair = K::decode(&encoded_key)
                    .and_then(|k| V::decode(&encoded_value).map(|v| (k, v)));
                return Some(pair);
            }

            let max = self.core.store.max_blocks();
            while self.next_id < max && !self.core.store.is_live(self.next_id) {
                self.next_id += 1;
            }
            if self.next_id >= max {
                return None;
            }

            let id = self.next_id;
            self.next_id += 1;
            match self.core.load_bucket(id) {
                Ok(bucket) => self.pending.extend(bucket.into_entries()),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
