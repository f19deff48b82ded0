//! Immutable byte storage for an opened database.
//!
//! A database image is either read fully into memory or memory-mapped. Both
//! variants expose the same bounds-checked, read-only view. Nothing here is
//! mutable after construction, so a `ByteSource` can be shared across threads
//! without synchronization.

use crate::error::{MmdbError, Result};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

/// Storage for database bytes - either owned or memory-mapped
pub enum ByteSource {
    /// Bytes owned by the process heap
    Owned(Vec<u8>),
    /// Read-only file mapping
    Mmap(Mmap),
}

impl ByteSource {
    /// Memory-map a file.
    ///
    /// The mapping is released when the `ByteSource` is dropped.
    pub fn map_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| MmdbError::Io(format!("Failed to open {}: {}", path.display(), e)))?;

        // SAFETY: the mapping is read-only. Truncating or rewriting the file
        // while it is mapped is outside what this crate can defend against,
        // matching every other mmap-based MMDB reader.
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|e| MmdbError::Io(format!("Failed to mmap {}: {}", path.display(), e)))?;

        Ok(ByteSource::Mmap(mmap))
    }

    /// Get a slice of the entire buffer.
    pub fn as_slice(&self) -> &[u8] {
        match self {
            ByteSource::Owned(v) => v.as_slice(),
            ByteSource::Mmap(m) => &m[..],
        }
    }

    /// Total length of the buffer in bytes.
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// True if the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read `length` bytes at `offset` with bounds checking.
    pub fn read_bytes(&self, offset: usize, length: usize) -> Result<&[u8]> {
        read_slice(self.as_slice(), offset, length)
    }
}

impl From<Vec<u8>> for ByteSource {
    fn from(bytes: Vec<u8>) -> Self {
        ByteSource::Owned(bytes)
    }
}

impl std::fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            ByteSource::Owned(_) => "owned",
            ByteSource::Mmap(_) => "mmap",
        };
        f.debug_struct("ByteSource")
            .field("kind", &kind)
            .field("len", &self.len())
            .finish()
    }
}

/// Bounds-checked sub-slice shared by every reader in the crate.
///
/// Fails with `OutOfBounds` when `offset + length` overflows or exceeds the
/// buffer.
pub(crate) fn read_slice(buf: &[u8], offset: usize, length: usize) -> Result<&[u8]> {
    let end = offset
        .checked_add(length)
        .filter(|&end| end <= buf.len())
        .ok_or(MmdbError::OutOfBounds {
            offset,
            length,
            size: buf.len(),
        })?;
    Ok(&buf[offset..end])
}
