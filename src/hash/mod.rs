//! Extendible hash index
//!
//! A directory-addressed hash table whose buckets are fixed-capacity sorted
//! blocks inside a block store.
//!
//! ## Architecture
//!
//! ```text
//! get/put/remove
//!       │
//!       ▼
//! ┌─────────────┐   address(hash)   ┌─────────────┐
//! │   DiskMap   │ ────────────────► │  Directory  │
//! │ (orchestra- │                   │ 2^depth →   │
//! │  tion)      │ ◄──────────────── │ block ids   │
//! └──────┬──────┘     bucket id     └─────────────┘
//!        │
//!        ▼
//! ┌─────────────┐     block bytes   ┌─────────────┐
//! │ BlockStore  │ ────────────────► │   Bucket    │
//! │             │ ◄──────────────── │ sorted block│
//! └─────────────┘                   └─────────────┘
//! ```
//!
//! Addresses are the low `depth` bits of the key hash, bit-reversed so the
//! least-significant hash bit becomes the most-significant address bit. This
//! keeps every bucket's directory slots contiguous: doubling the directory
//! duplicates slot pairs, and a split repoints exactly the upper half of the
//! old bucket's range.

mod bucket;
mod directory;
mod index;

pub use index::{DiskMap, Iter};

/// Stable hash of an encoded key. CRC32 is cheap, seedless, and identical
/// across processes, which the persisted directory requires.
pub(crate) fn hash_key(encoded_key: &[u8]) -> u32 {
    crc32fast::hash(encoded_key)
}
