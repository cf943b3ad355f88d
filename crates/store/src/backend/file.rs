//! File-based storage backend using position-based I/O (`pread`/`pwrite`).
//!
//! Reads never take a lock: [`FileExt::read_exact_at`] takes `&self` and does
//! not move the file cursor. Appends and truncation are serialized by a
//! unit `Mutex<()>` so that concurrent appends cannot interleave.

#[cfg(unix)]
use std::os::unix::fs::FileExt;
#[cfg(windows)]
use std::os::windows::fs::FileExt;
use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;

use super::{StorageBackend, check_range};
use crate::error::{Error, Result};

/// File-based storage backend.
///
/// Durability requires the caller to invoke [`sync`](StorageBackend::sync)
/// after writes.
pub struct FileBackend {
    file: File,
    /// Serializes appends and truncation.
    write_lock: Mutex<()>,
    /// Logical end of file. Updated only while `write_lock` is held.
    len: AtomicU64,
    path: PathBuf,
}

impl FileBackend {
    /// Opens a file, creating it empty if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).create(true).open(path.as_ref())?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            write_lock: Mutex::new(()),
            len: AtomicU64::new(len),
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Creates a new empty file, discarding any existing contents.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be created.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        file.sync_all()?;
        Ok(Self {
            file,
            write_lock: Mutex::new(()),
            len: AtomicU64::new(0),
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Returns the path this backend was opened with.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for FileBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBackend")
            .field("path", &self.path)
            .field("len", &self.len.load(Ordering::Acquire))
            .finish()
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        check_range(offset, len, self.len.load(Ordering::Acquire))?;
        let mut buf = vec![0u8; len];
        read_exact_at_offset(&self.file, &mut buf, offset)?;
        Ok(buf)
    }

    fn append(&self, data: &[u8]) -> Result<u64> {
        let _guard = self.write_lock.lock();
        let offset = self.len.load(Ordering::Acquire);
        write_all_at_offset(&self.file, data, offset)?;
        self.len.store(offset + data.len() as u64, Ordering::Release);
        Ok(offset)
    }

    fn len(&self) -> u64 {
        self.len.load(Ordering::Acquire)
    }

    fn truncate(&self, len: u64) -> Result<()> {
        let _guard = self.write_lock.lock();
        let current = self.len.load(Ordering::Acquire);
        if len > current {
            return Err(Error::Corrupted {
                reason: format!("cannot truncate {} to {len}: length is {current}", self.path.display()),
            });
        }
        self.file.set_len(len)?;
        self.len.store(len, Ordering::Release);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Platform-specific position-based I/O helpers
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn read_exact_at_offset(file: &File, buf: &mut [u8], offset: u64) -> Result<()> {
    file.read_exact_at(buf, offset)?;
    Ok(())
}

/// `seek_read` moves the cursor on Windows; only positional reads use it here.
#[cfg(windows)]
fn read_exact_at_offset(file: &File, buf: &mut [u8], offset: u64) -> Result<()> {
    let mut pos = 0;
    while pos < buf.len() {
        let n = file.seek_read(&mut buf[pos..], offset + pos as u64)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "unexpected end of file during seek_read",
            )
            .into());
        }
        pos += n;
    }
    Ok(())
}

#[cfg(unix)]
fn write_all_at_offset(file: &File, data: &[u8], offset: u64) -> Result<()> {
    file.write_all_at(data, offset)?;
    Ok(())
}

#[cfg(windows)]
fn write_all_at_offset(file: &File, data: &[u8], offset: u64) -> Result<()> {
    let mut pos = 0;
    while pos < data.len() {
        let n = file.seek_write(&data[pos..], offset + pos as u64)?;
        pos += n;
    }
    Ok(())
}
