//! Memory-mapped file backend
//!
//! Maps the whole block file into memory. The file is preallocated to its
//! full fixed size at creation, so the mapping never needs to grow or be
//! re-established. Writes become visible to readers immediately; `sync`
//! flushes dirty pages with msync.

use std::fs::{File, OpenOptions};
use std::path::Path;

use memmap2::MmapMut;

use crate::error::{DiskMapError, Result};

use super::BlockIo;

/// Memory-mapped I/O backend
pub struct MmapIo {
    // Held to keep the mapping's backing descriptor alive.
    _file: File,
    map: MmapMut,
}

impl MmapIo {
    /// Map an existing file read/write.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        // Safety: the store holds the only handle to this file for the
        // lifetime of the map; geometry is fixed, so the file is never
        // truncated or resized while mapped.
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { _file: file, map })
    }

    /// Create (or truncate) a file of `size` bytes and map it.
    pub fn create(path: &Path, size: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size)?;
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self { _file: file, map })
    }

    fn check_range(&self, offset: u64, len: usize) -> Result<()> {
        let end = offset + len as u64;
        if end > self.map.len() as u64 {
            return Err(DiskMapError::Format(format!(
                "Mapped access [{offset}, {end}) past end of file ({} bytes)",
                self.map.len()
            )));
        }
        Ok(())
    }
}

impl BlockIo for MmapIo {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<()> {
        self.check_range(offset, buf.len())?;
        let start = offset as usize;
        buf.copy_from_slice(&self.map[start..start + buf.len()]);
        Ok(())
    }

    fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<()> {
        self.check_range(offset, buf.len())?;
        let start = offset as usize;
        self.map[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.map.flush()?;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.map.len() as u64
    }
}
