//! Configuration for diskmap
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{DiskMapError, Result};

/// Smallest admissible bucket size in bytes.
pub const MIN_BUCKET_SIZE: u32 = 64;

/// Largest admissible bucket size in bytes. The bucket header stores byte
/// counts as u16, so one block must stay well below 64 KiB.
pub const MAX_BUCKET_SIZE: u32 = 32 * 1024;

/// Hard ceiling on the directory's address-bit depth. A directory at this
/// depth holds 2^24 slots; growth past it fails with `OutOfSpace`.
pub const MAX_DIRECTORY_DEPTH: u32 = 24;

/// Main configuration for a diskmap instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Path of the backing block file.
    pub path: PathBuf,

    /// Bucket capacity in bytes. Equals the block size of the backing store:
    /// one bucket occupies exactly one block. Fixed at create time.
    pub bucket_size: u32,

    /// Maximum number of bucket blocks the file can ever hold. Fixed at
    /// create time; the file is preallocated to its full size.
    pub max_buckets: u32,

    /// Maximum directory depth this map may grow to. Determines how much
    /// reserved metadata space is laid out at create time (4 bytes per slot,
    /// 2^max_depth slots).
    pub max_depth: u32,

    // -------------------------------------------------------------------------
    // Runtime Configuration
    // -------------------------------------------------------------------------
    /// Which I/O strategy backs the block file.
    pub io_backend: IoBackend,

    /// Whether `remove` tries to combine buddy buckets and collapse the
    /// directory. Off by default: deletes never shrink the directory or
    /// reclaim bucket blocks unless this is enabled.
    pub merge_on_delete: bool,
}

/// I/O strategy for the backing block file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoBackend {
    /// Portable seek/read/write file I/O.
    File,

    /// Memory-mapped file. Writes are visible to readers without an explicit
    /// flush; `save` issues an msync.
    Mmap,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./diskmap.db"),
            bucket_size: 4096,
            max_buckets: 1024,
            max_depth: 16,
            io_backend: IoBackend::File,
            merge_on_delete: false,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check construction parameters before any file is touched.
    pub fn validate(&self) -> Result<()> {
        if self.bucket_size < MIN_BUCKET_SIZE || self.bucket_size > MAX_BUCKET_SIZE {
            return Err(DiskMapError::Config(format!(
                "bucket_size {} outside [{}, {}]",
                self.bucket_size, MIN_BUCKET_SIZE, MAX_BUCKET_SIZE
            )));
        }
        if self.max_buckets == 0 {
            return Err(DiskMapError::Config("max_buckets must be at least 1".into()));
        }
        if self.max_depth == 0 || self.max_depth > MAX_DIRECTORY_DEPTH {
            return Err(DiskMapError::Config(format!(
                "max_depth {} outside [1, {}]",
                self.max_depth, MAX_DIRECTORY_DEPTH
            )));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the backing file path
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Set the bucket size in bytes (one block per bucket)
    pub fn bucket_size(mut self, bytes: u32) -> Self {
        self.config.bucket_size = bytes;
        self
    }

    /// Set the maximum number of bucket blocks
    pub fn max_buckets(mut self, count: u32) -> Self {
        self.config.max_buckets = count;
        self
    }

    /// Set the maximum directory depth
    pub fn max_depth(mut self, depth: u32) -> Self {
        self.config.max_depth = depth;
        self
    }

    /// Select the I/O backend
    pub fn io_backend(mut self, backend: IoBackend) -> Self {
        self.config.io_backend = backend;
        self
    }

    /// Enable or disable buddy merging on delete
    pub fn merge_on_delete(mut self, enabled: bool) -> Self {
        self.config.merge_on_delete = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
