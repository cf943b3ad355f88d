//! Shared test utilities for tripledb crates.
//!
//! This crate provides common test helpers to reduce boilerplate across test modules:
//!
//! - [`TestDir`] - Managed temporary directory for store locations
//! - [`CrashInjector`] - Stops a commit at a chosen [`CommitPoint`](tripledb_dict::CommitPoint)
//! - [`strategies`] - Proptest generators for terms

#![deny(unsafe_code)]

mod test_dir;
pub use test_dir::TestDir;

mod crash_injector;
pub use crash_injector::CrashInjector;

pub mod strategies;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    // ============================================
    // TestDir tests
    // ============================================

    #[test]
    fn test_dir_creates_temp_directory() {
        let dir = TestDir::new();
        assert!(dir.path().exists(), "temp directory should exist");
        assert!(dir.path().is_dir(), "should be a directory");
    }

    #[test]
    fn test_dir_join_stays_inside() {
        let dir = TestDir::new();
        let store = dir.join("store");
        assert!(store.starts_with(dir.path()));
        assert!(store.ends_with("store"));
    }

    #[test]
    fn test_dir_cleanup_on_drop() {
        let path = {
            let dir = TestDir::new();
            let p = dir.path().to_path_buf();
            std::fs::write(p.join("nodes.dat"), "data").expect("write file");
            assert!(p.exists());
            p
        };
        assert!(!path.exists(), "temp directory should be cleaned up on drop");
    }

    #[test]
    fn test_store_dir_is_distinct_per_call() {
        let dir = TestDir::new();
        let a = dir.store_dir();
        let b = dir.store_dir();
        assert_ne!(a, b);
        assert!(!a.exists(), "store directory is left for the store to create");
    }
}
