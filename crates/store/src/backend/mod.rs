//! Storage backend abstraction.
//!
//! Every persistent structure in this crate is an append-only byte sequence.
//! The backend trait covers exactly that: positional reads, appends at the
//! end, truncation (for torn-tail repair and journal reset), and sync.
//! [`FileBackend`] is used for store locations on disk and
//! [`InMemoryBackend`] for tests and per-transaction staging.

mod file;
mod memory;

pub use file::FileBackend;
pub use memory::InMemoryBackend;

use crate::error::Result;

/// Append-only byte storage.
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Corrupted` if the range extends past the end, and
    /// `Error::Io` if the read fails.
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>>;

    /// Appends `data` and returns the offset it was written at.
    ///
    /// Concurrent appends are serialized; each lands contiguously.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the write fails.
    fn append(&self, data: &[u8]) -> Result<u64>;

    /// Returns the current length in bytes.
    fn len(&self) -> u64;

    /// Returns true if nothing has been written.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cuts the contents back to `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::Corrupted` if `len` exceeds the current length, and
    /// `Error::Io` if the truncation fails.
    fn truncate(&self, len: u64) -> Result<()>;

    /// Flushes all writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the sync fails.
    fn sync(&self) -> Result<()>;
}

impl<B: StorageBackend + ?Sized> StorageBackend for std::sync::Arc<B> {
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        (**self).read_at(offset, len)
    }

    fn append(&self, data: &[u8]) -> Result<u64> {
        (**self).append(data)
    }

    fn len(&self) -> u64 {
        (**self).len()
    }

    fn truncate(&self, len: u64) -> Result<()> {
        (**self).truncate(len)
    }

    fn sync(&self) -> Result<()> {
        (**self).sync()
    }
}

impl<B: StorageBackend + ?Sized> StorageBackend for &B {
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        (**self).read_at(offset, len)
    }

    fn append(&self, data: &[u8]) -> Result<u64> {
        (**self).append(data)
    }

    fn len(&self) -> u64 {
        (**self).len()
    }

    fn truncate(&self, len: u64) -> Result<()> {
        (**self).truncate(len)
    }

    fn sync(&self) -> Result<()> {
        (**self).sync()
    }
}

/// Checks that `offset..offset + len` lies within `total` bytes.
pub(crate) fn check_range(offset: u64, len: usize, total: u64) -> Result<()> {
    let end = offset.checked_add(len as u64);
    match end {
        Some(end) if end <= total => Ok(()),
        _ => Err(crate::error::Error::Corrupted {
            reason: format!("read of {len} bytes at offset {offset} exceeds length {total}"),
        }),
    }
}
