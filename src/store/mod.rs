//! Block store
//!
//! Fixed-size-block file with free-space tracking and a reserved metadata
//! region.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (20 bytes)                                       │
//! │   Magic "DMBF" (4) | Version u32 | BlockSize u32        │
//! │   | MaxBlocks u32 | ReservedBytes u32                   │
//! ├─────────────────────────────────────────────────────────┤
//! │ Bitset Region                                           │
//! │   WordCount u32 | WordCount × u64 occupancy words       │
//! ├─────────────────────────────────────────────────────────┤
//! │ Reserved Region (ReservedBytes bytes)                   │
//! │   Opaque to the store; holds table metadata             │
//! ├─────────────────────────────────────────────────────────┤
//! │ Block Region                                            │
//! │   MaxBlocks × BlockSize bytes                           │
//! └─────────────────────────────────────────────────────────┘
//! ```
//! Every region boundary is rounded up to a BlockSize multiple, and the file
//! is preallocated to its full size at creation. All integers little-endian.

mod bitset;
mod file_io;
mod mmap_io;

pub use file_io::FileIo;
pub use mmap_io::MmapIo;

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::IoBackend;
use crate::error::{DiskMapError, Result};

use bitset::BitSet;

// =============================================================================
// Format Constants
// =============================================================================

/// Magic bytes identifying a diskmap block file
pub(crate) const MAGIC: &[u8; 4] = b"DMBF";

/// Current block file format version
pub(crate) const FORMAT_VERSION: u32 = 1;

/// Header size: magic (4) + version (4) + block_size (4) + max_blocks (4)
/// + reserved_bytes (4) = 20 bytes
pub(crate) const HEADER_SIZE: u64 = 20;

// =============================================================================
// I/O Backend Abstraction
// =============================================================================

/// Raw I/O strategy behind a block store.
///
/// Both implementations must behave identically from the store's point of
/// view; they differ only in how bytes reach the file.
pub trait BlockIo: Send {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<()>;

    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<()>;

    fn sync(&mut self) -> Result<()>;

    fn len(&self) -> u64;
}

fn open_backend(path: &Path, backend: IoBackend) -> Result<Box<dyn BlockIo>> {
    Ok(match backend {
        IoBackend::File => Box::new(FileIo::open(path)?),
        IoBackend::Mmap => Box::new(MmapIo::open(path)?),
    })
}

fn create_backend(path: &Path, backend: IoBackend, size: u64) -> Result<Box<dyn BlockIo>> {
    Ok(match backend {
        IoBackend::File => Box::new(FileIo::create(path, size)?),
        IoBackend::Mmap => Box::new(MmapIo::create(path, size)?),
    })
}

// =============================================================================
// Region Layout
// =============================================================================

fn align_up(n: u64, block_size: u64) -> u64 {
    n.div_ceil(block_size) * block_size
}

/// Byte offsets of each region, derived from the header geometry.
#[derive(Debug, Clone, Copy)]
struct Layout {
    block_size: u32,
    max_blocks: u32,
    reserved_bytes: u32,
    bitset_offset: u64,
    reserved_offset: u64,
    blocks_offset: u64,
    total_size: u64,
}

impl Layout {
    fn compute(block_size: u32, max_blocks: u32, reserved_bytes: u32) -> Self {
        let bs = block_size as u64;
        let bitset_offset = align_up(HEADER_SIZE, bs);
        let bitset_len = 4 + BitSet::word_count(max_blocks) as u64 * 8;
        let reserved_offset = bitset_offset + align_up(bitset_len, bs);
        let blocks_offset = reserved_offset + align_up(reserved_bytes as u64, bs);
        let total_size = blocks_offset + max_blocks as u64 * bs;
        Self {
            block_size,
            max_blocks,
            reserved_bytes,
            bitset_offset,
            reserved_offset,
            blocks_offset,
            total_size,
        }
    }

    fn block_offset(&self, id: u32) -> u64 {
        self.blocks_offset + id as u64 * self.block_size as u64
    }

    fn word_offset(&self, word_index: usize) -> u64 {
        self.bitset_offset + 4 + word_index as u64 * 8
    }
}

// =============================================================================
// Block Store
// =============================================================================

/// Durable, randomly-addressable fixed-size block storage.
///
/// Records are numbered `0..max_blocks`; the in-memory occupancy bitset is
/// the single source of truth for which ids are live. Mutated bitset words
/// are written through immediately; `save` persists the full bitset and
/// syncs the backend.
pub struct BlockStore {
    path: PathBuf,
    io: Box<dyn BlockIo>,
    layout: Layout,
    occupancy: BitSet,
}

impl BlockStore {
    /// Create a new block file, preallocated to its full size.
    pub fn create(
        path: &Path,
        block_size: u32,
        max_blocks: u32,
        reserved_bytes: u32,
        backend: IoBackend,
    ) -> Result<Self> {
        if block_size == 0 || max_blocks == 0 {
            return Err(DiskMapError::Config(
                "block_size and max_blocks must be non-zero".into(),
            ));
        }

        let layout = Layout::compute(block_size, max_blocks, reserved_bytes);
        let mut io = create_backend(path, backend, layout.total_size)?;

        // Header
        let mut header = [0u8; HEADER_SIZE as usize];
        header[0..4].copy_from_slice(MAGIC);
        header[4..8].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        header[8..12].copy_from_slice(&block_size.to_le_bytes());
        header[12..16].copy_from_slice(&max_blocks.to_le_bytes());
        header[16..20].copy_from_slice(&reserved_bytes.to_le_bytes());
        io.write_at(&header, 0)?;

        // Empty bitset
        let occupancy = BitSet::new(max_blocks);
        let word_count = BitSet::word_count(max_blocks);
        io.write_at(&word_count.to_le_bytes(), layout.bitset_offset)?;
        for (i, word) in occupancy.words().iter().enumerate() {
            io.write_at(&word.to_le_bytes(), layout.word_offset(i))?;
        }
        io.sync()?;

        debug!(
            path = %path.display(),
            block_size,
            max_blocks,
            reserved_bytes,
            total_size = layout.total_size,
            "created block file"
        );

        Ok(Self {
            path: path.to_path_buf(),
            io,
            layout,
            occupancy,
        })
    }

    /// Open an existing block file, validating magic marker and version.
    pub fn open(path: &Path, backend: IoBackend) -> Result<Self> {
        let mut io = open_backend(path, backend)?;

        if io.len() < HEADER_SIZE {
            return Err(DiskMapError::Format(format!(
                "File too small for a header: {} bytes",
                io.len()
            )));
        }

        let mut header = [0u8; HEADER_SIZE as usize];
        io.read_at(&mut header, 0)?;

        if &header[0..4] != MAGIC {
            return Err(DiskMapError::Format(format!(
                "Bad magic marker: expected {:?}, got {:?}",
                MAGIC,
                &header[0..4]
            )));
        }

        let version = u32::from_le_bytes(header[4..8].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(DiskMapError::Format(format!(
                "Unsupported format version {version} (expected {FORMAT_VERSION})"
            )));
        }

        let block_size = u32::from_le_bytes(header[8..12].try_into().unwrap());
        let max_blocks = u32::from_le_bytes(header[12..16].try_into().unwrap());
        let reserved_bytes = u32::from_le_bytes(header[16..20].try_into().unwrap());
        if block_size == 0 || max_blocks == 0 {
            return Err(DiskMapError::Format("Zero block_size or max_blocks in header".into()));
        }

        let layout = Layout::compute(block_size, max_blocks, reserved_bytes);
        if io.len() != layout.total_size {
            return Err(DiskMapError::Format(format!(
                "File size {} does not match declared geometry ({} expected)",
                io.len(),
                layout.total_size
            )));
        }

        // Bitset
        let mut count_buf = [0u8; 4];
        io.read_at(&mut count_buf, layout.bitset_offset)?;
        let word_count = u32::from_le_bytes(count_buf);
        if word_count != BitSet::word_count(max_blocks) {
            return Err(DiskMapError::Format(format!(
                "Bitset word count {word_count} disagrees with max_blocks {max_blocks}"
            )));
        }

        let mut words = Vec::with_capacity(word_count as usize);
        let mut word_buf = [0u8; 8];
        for i in 0..word_count as usize {
            io.read_at(&mut word_buf, layout.word_offset(i))?;
            words.push(u64::from_le_bytes(word_buf));
        }
        let occupancy = BitSet::from_words(words, max_blocks);

        debug!(
            path = %path.display(),
            block_size,
            max_blocks,
            live = occupancy.count_ones(),
            "opened block file"
        );

        Ok(Self {
            path: path.to_path_buf(),
            io,
            layout,
            occupancy,
        })
    }

    // =========================================================================
    // Record Operations
    // =========================================================================

    /// Insert a record at the lowest free id.
    ///
    /// `bytes` shorter than a block are zero-padded; longer input is
    /// truncated to the block size.
    pub fn insert(&mut self, bytes: &[u8]) -> Result<u32> {
        let id = self.occupancy.first_clear().ok_or_else(|| {
            DiskMapError::OutOfSpace(format!("All {} blocks in use", self.layout.max_blocks))
        })?;
        self.write_block(id, bytes)?;
        self.mark(id, true)?;
        Ok(id)
    }

    /// Insert a record at a caller-chosen id, overwriting any previous
    /// occupant of that block.
    pub fn insert_at(&mut self, id: u32, bytes: &[u8]) -> Result<()> {
        if id >= self.layout.max_blocks {
            return Err(DiskMapError::OutOfRange {
                id,
                max: self.layout.max_blocks,
            });
        }
        self.write_block(id, bytes)?;
        self.mark(id, true)?;
        Ok(())
    }

    /// Read a record's block. Returns None for a free or out-of-range id.
    pub fn get(&mut self, id: u32) -> Result<Option<Vec<u8>>> {
        if !self.occupancy.get(id) {
            return Ok(None);
        }
        let mut buf = vec![0u8; self.layout.block_size as usize];
        self.io.read_at(&mut buf, self.layout.block_offset(id))?;
        Ok(Some(buf))
    }

    /// Overwrite a live record. Returns false (no write) when the id is free.
    pub fn update(&mut self, id: u32, bytes: &[u8]) -> Result<bool> {
        if !self.occupancy.get(id) {
            return Ok(false);
        }
        self.write_block(id, bytes)?;
        Ok(true)
    }

    /// Free a record. Returns false when the id was already free.
    pub fn delete(&mut self, id: u32) -> Result<bool> {
        if !self.occupancy.get(id) {
            return Ok(false);
        }
        self.mark(id, false)?;
        Ok(true)
    }

    /// Whether `id` names a live record.
    pub fn is_live(&self, id: u32) -> bool {
        self.occupancy.get(id)
    }

    fn write_block(&mut self, id: u32, bytes: &[u8]) -> Result<()> {
        let size = self.layout.block_size as usize;
        let offset = self.layout.block_offset(id);
        if bytes.len() == size {
            self.io.write_at(bytes, offset)
        } else {
            let mut block = vec![0u8; size];
            let n = bytes.len().min(size);
            block[..n].copy_from_slice(&bytes[..n]);
            self.io.write_at(&block, offset)
        }
    }

    fn mark(&mut self, id: u32, live: bool) -> Result<()> {
        if live {
            self.occupancy.set(id);
        } else {
            self.occupancy.clear(id);
        }
        let w = BitSet::word_index(id);
        self.io
            .write_at(&self.occupancy.word(w).to_le_bytes(), self.layout.word_offset(w))
    }

    // =========================================================================
    // Reserved Region
    // =========================================================================

    /// Size of the reserved metadata region in bytes.
    pub fn reserved_size(&self) -> u32 {
        self.layout.reserved_bytes
    }

    /// Read the full reserved region.
    pub fn read_reserved(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.layout.reserved_bytes as usize];
        self.io.read_at(&mut buf, self.layout.reserved_offset)?;
        Ok(buf)
    }

    /// Write a prefix of the reserved region.
    pub fn write_reserved(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.layout.reserved_bytes as usize {
            return Err(DiskMapError::OutOfSpace(format!(
                "Metadata of {} bytes exceeds reserved region of {}",
                bytes.len(),
                self.layout.reserved_bytes
            )));
        }
        self.io.write_at(bytes, self.layout.reserved_offset)
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    /// Iterate live records in ascending id order, starting at `start`.
    pub fn iter_from(&mut self, start: u32) -> Blocks<'_> {
        Blocks {
            store: self,
            next_id: start,
        }
    }

    /// Iterate all live records in ascending id order.
    pub fn iter(&mut self) -> Blocks<'_> {
        self.iter_from(0)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Persist the occupancy bitset and flush the backend.
    pub fn save(&mut self) -> Result<()> {
        let words = self.occupancy.words().to_vec();
        for (i, word) in words.into_iter().enumerate() {
            self.io.write_at(&word.to_le_bytes(), self.layout.word_offset(i))?;
        }
        self.io.sync()
    }

    /// Save, then drop the store.
    pub fn close(mut self) -> Result<()> {
        self.save()
    }

    /// Remove the backing file entirely.
    pub fn destroy(self) -> Result<()> {
        let path = self.path.clone();
        drop(self);
        fs::remove_file(&path)?;
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn block_size(&self) -> u32 {
        self.layout.block_size
    }

    pub fn max_blocks(&self) -> u32 {
        self.layout.max_blocks
    }

    /// Number of live records.
    pub fn live_blocks(&self) -> u32 {
        self.occupancy.count_ones()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Iterator over live records in ascending id order.
pub struct Blocks<'a> {
    store: &'a mut BlockStore,
    next_id: u32,
}

impl Iterator for Blocks<'_> {
    type Item = Result<(u32, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next_id < self.store.layout.max_blocks {
            let id = self.next_id;
            self.next_id += 1;
            if !self.store.is_live(id) {
                continue;
            }
            return match self.store.get(id) {
                Ok(Some(bytes)) => Some(Ok((id, bytes))),
                Ok(None) => continue,
                Err(e) => Some(Err(e)),
            };
        }
        None
    }
}
