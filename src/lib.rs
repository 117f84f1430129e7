//! # diskmap
//!
//! Disk-based associative containers built on raw fixed-size block files:
//! - Block store with free-space tracking and a reserved metadata region
//! - Pluggable I/O backends (plain file I/O, memory-mapped)
//! - Extendible hash index: directory-addressed buckets that split under
//!   insert pressure and (optionally) merge under delete pressure
//! - Typed key/value codecs with order-aware encoded comparison
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     DiskMap<K, V>                            │
//! │        (one exclusive lock per open map instance)            │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │  Directory  │          │   Bucket    │
//!   │ 2^depth →   │          │ sorted block│
//!   │ block ids   │          └──────┬──────┘
//!   └──────┬──────┘                 │
//!          │                        │
//!          ▼                        ▼
//!   ┌─────────────────────────────────────┐
//!   │             BlockStore              │
//!   │   FileIo backend  |  MmapIo backend │
//!   └─────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use diskmap::{Config, DiskMap};
//!
//! # fn main() -> diskmap::Result<()> {
//! let config = Config::builder().path("/tmp/users.db").build();
//! let map: DiskMap<u64, String> = DiskMap::create(config)?;
//!
//! map.put(&1, &"alice".to_string())?;
//! assert_eq!(map.get(&1)?, Some("alice".to_string()));
//!
//! map.save()?;
//! # Ok(())
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod codec;
pub mod store;
pub mod hash;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{DiskMapError, Result};
pub use config::{Config, IoBackend};
pub use codec::{Bin, Key, Value};
pub use hash::DiskMap;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of diskmap
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
