//! Temporary directory management for tests.
//!
//! [`TestDir`] wraps [`tempfile::TempDir`] with helpers for store locations.

// Test utilities are expected to panic on failure - that's their purpose
#![allow(clippy::expect_used)]

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use tempfile::TempDir;

/// A managed temporary directory for tests.
///
/// The directory is automatically cleaned up when this struct is dropped.
///
/// # Example
///
/// ```
/// use tripledb_test_utils::TestDir;
///
/// let dir = TestDir::new();
/// let location = dir.store_dir();
/// // Open a store at `location`...
/// // Directory cleaned up when `dir` goes out of scope
/// ```
pub struct TestDir {
    inner: TempDir,
    next_store: AtomicUsize,
}

impl TestDir {
    /// Create a new temporary directory.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        let inner = TempDir::new().expect("failed to create temp directory");
        Self { inner, next_store: AtomicUsize::new(0) }
    }

    /// Returns the path to the temporary directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Join a relative path to the temporary directory.
    #[must_use]
    pub fn join<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.inner.path().join(path)
    }

    /// Returns a fresh, not yet created, store location inside the directory.
    #[must_use]
    pub fn store_dir(&self) -> PathBuf {
        let n = self.next_store.fetch_add(1, Ordering::Relaxed);
        self.join(format!("store-{n}"))
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}
