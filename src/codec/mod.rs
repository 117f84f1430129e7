//! Key/value codec framework
//!
//! The map stores opaque byte strings; these traits define how typed keys and
//! values move in and out of them. A codec must be deterministic and
//! round-trip faithful: `decode(encode(v)) == v`.
//!
//! Integer keys use fixed-width big-endian encodings (signed types flip the
//! sign bit first) so that comparing encoded bytes lexicographically agrees
//! with comparing the values themselves. String and byte-vector keys compare
//! as raw bytes. Types without an order-preserving encoding fall back to the
//! default `compare_encoded`, which decodes both sides.

mod bin;

pub use bin::Bin;

use std::cmp::Ordering;

use bytes::BufMut;

use crate::error::{DiskMapError, Result};

// =============================================================================
// Traits
// =============================================================================

/// A type that can be serialized into a bucket entry.
///
/// `decode` always receives the exact slice produced by `encode`; entries are
/// length-prefixed on disk, so implementations never need to know their own
/// encoded length up front.
pub trait Value: Sized {
    /// Encoded size in bytes.
    fn byte_size(&self) -> usize;

    /// Append the encoded form to `buf`.
    fn encode(&self, buf: &mut impl BufMut);

    /// Reconstruct a value from its exact encoded slice.
    fn decode(bytes: &[u8]) -> Result<Self>;
}

/// A value type that can also serve as a map key.
pub trait Key: Value + Ord {
    /// Total order over *encoded* keys.
    ///
    /// The default decodes both sides and defers to `Ord`. Implementations
    /// whose encoding is order-preserving override this with a plain byte
    /// comparison.
    fn compare_encoded(a: &[u8], b: &[u8]) -> Result<Ordering> {
        Ok(Self::decode(a)?.cmp(&Self::decode(b)?))
    }
}

// =============================================================================
// Fixed-width integer codecs
// =============================================================================

fn exact_array<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| DiskMapError::Codec(format!("{what}: expected {N} bytes, got {}", bytes.len())))
}

impl Value for u32 {
    fn byte_size(&self) -> usize {
        4
    }

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32(*self);
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(u32::from_be_bytes(exact_array(bytes, "u32")?))
    }
}

impl Key for u32 {
    fn compare_encoded(a: &[u8], b: &[u8]) -> Result<Ordering> {
        Ok(a.cmp(b))
    }
}

impl Value for u64 {
    fn byte_size(&self) -> usize {
        8
    }

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64(*self);
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(u64::from_be_bytes(exact_array(bytes, "u64")?))
    }
}

impl Key for u64 {
    fn compare_encoded(a: &[u8], b: &[u8]) -> Result<Ordering> {
        Ok(a.cmp(b))
    }
}

// Signed integers flip the sign bit so negatives sort before positives in
// the encoded form.

impl Value for i32 {
    fn byte_size(&self) -> usize {
        4
    }

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32((*self as u32) ^ (1 << 31));
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let flipped = u32::from_be_bytes(exact_array(bytes, "i32")?);
        Ok((flipped ^ (1 << 31)) as i32)
    }
}

impl Key for i32 {
    fn compare_encoded(a: &[u8], b: &[u8]) -> Result<Ordering> {
        Ok(a.cmp(b))
    }
}

impl Value for i64 {
    fn byte_size(&self) -> usize {
        8
    }

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64((*self as u64) ^ (1 << 63));
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let flipped = u64::from_be_bytes(exact_array(bytes, "i64")?);
        Ok((flipped ^ (1 << 63)) as i64)
    }
}

impl Key for i64 {
    fn compare_encoded(a: &[u8], b: &[u8]) -> Result<Ordering> {
        Ok(a.cmp(b))
    }
}

// =============================================================================
// Byte-string codecs
// =============================================================================

impl Value for String {
    fn byte_size(&self) -> usize {
        self.len()
    }

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_slice(self.as_bytes());
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| DiskMapError::Codec(format!("Invalid UTF-8 string: {e}")))
    }
}

impl Key for String {
    fn compare_encoded(a: &[u8], b: &[u8]) -> Result<Ordering> {
        Ok(a.cmp(b))
    }
}

impl Value for Vec<u8> {
    fn byte_size(&self) -> usize {
        self.len()
    }

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_slice(self);
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bytes.to_vec())
    }
}

impl Key for Vec<u8> {
    fn compare_encoded(a: &[u8], b: &[u8]) -> Result<Ordering> {
        Ok(a.cmp(b))
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Encode a value into a fresh buffer.
pub fn to_bytes<T: Value>(value: &T) -> Vec<u8> {
    let mut buf = Vec::with_capacity(value.byte_size());
    value.encode(&mut buf);
    buf
}
