//! Error types for diskmap
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using DiskMapError
pub type Result<T> = std::result::Result<T, DiskMapError>;

/// Unified error type for diskmap operations
#[derive(Debug, Error)]
pub enum DiskMapError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Block File Errors
    // -------------------------------------------------------------------------
    /// Bad magic marker, unsupported format version, or a file whose size
    /// does not match its declared geometry. Fatal at open time, no retry.
    #[error("Invalid block file: {0}")]
    Format(String),

    /// No free block left below `max_blocks`, or the directory cannot grow
    /// past its maximum depth. Surfaced to the caller, never retried
    /// internally.
    #[error("Out of space: {0}")]
    OutOfSpace(String),

    /// A caller-chosen record id beyond the fixed block count.
    #[error("Record id {id} out of range (max {max})")]
    OutOfRange { id: u32, max: u32 },

    // -------------------------------------------------------------------------
    // Map Errors
    // -------------------------------------------------------------------------
    /// Entry rejected before any mutation: it could never fit in a bucket,
    /// even alone after repeated splits.
    #[error("Key/value too large: {size} bytes (limit {limit})")]
    KeyValueTooLarge { size: usize, limit: usize },

    /// Checksum mismatch, a directory slot naming a free block, or an
    /// undecodable bucket.
    #[error("Corrupted data: {0}")]
    Corruption(String),

    // -------------------------------------------------------------------------
    // Codec Errors
    // -------------------------------------------------------------------------
    #[error("Codec error: {0}")]
    Codec(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}
