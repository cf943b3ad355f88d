//! In-memory storage backend.

use parking_lot::RwLock;

use super::{StorageBackend, check_range};
use crate::error::{Error, Result};

/// In-memory storage backend.
///
/// All data is lost when the backend is dropped. Used for tests and for
/// per-transaction staging structures.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend holding `bytes`, as if they had been appended.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { data: RwLock::new(bytes) }
    }

    /// Returns a copy of the current contents.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let data = self.data.read();
        check_range(offset, len, data.len() as u64)?;
        let start = offset as usize;
        Ok(data[start..start + len].to_vec())
    }

    fn append(&self, bytes: &[u8]) -> Result<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn len(&self) -> u64 {
        self.data.read().len() as u64
    }

    fn truncate(&self, len: u64) -> Result<()> {
        let mut data = self.data.write();
        if len > data.len() as u64 {
            return Err(Error::Corrupted {
                reason: format!("cannot truncate to {len}: length is {}", data.len()),
            });
        }
        data.truncate(len as usize);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_append_read_truncate() {
        let backend = InMemoryBackend::new();
        assert!(backend.is_empty());
        assert_eq!(backend.append(b"abc").unwrap(), 0);
        assert_eq!(backend.append(b"de").unwrap(), 3);
        assert_eq!(backend.read_at(1, 3).unwrap(), b"bcd");
        backend.truncate(1).unwrap();
        assert_eq!(backend.to_bytes(), b"a");
        assert!(backend.read_at(0, 2).is_err());
        assert!(backend.truncate(5).is_err());
    }

    #[test]
    fn test_from_bytes() {
        let backend = InMemoryBackend::from_bytes(b"seed".to_vec());
        assert_eq!(backend.len(), 4);
        assert_eq!(backend.append(b"!").unwrap(), 4);
    }
}
