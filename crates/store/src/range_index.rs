//! Ordered term-hash → identifier index.
//!
//! The index is held in a `BTreeMap` and persisted as a sequence of
//! fixed-size records, one per insert:
//!
//! ```text
//! ┌───────────┬──────────────┬────────────────────────────────┐
//! │ key: [16] │ value: u64 LE│ xxh3_64(key ‖ value) as u32 LE │
//! └───────────┴──────────────┴────────────────────────────────┘
//! ```
//!
//! The record file is replayed into memory at open. Keys are unique; a key is
//! never rewritten once inserted.

use std::collections::BTreeMap;

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::RwLock;
use tripledb_types::{TERM_HASH_LEN, TermHash};

use crate::{
    backend::StorageBackend,
    error::{Error, Result},
};

const VALUE_SIZE: usize = 8;
const CHECKSUM_SIZE: usize = 4;

/// Size of one persisted record.
pub const RECORD_SIZE: usize = TERM_HASH_LEN + VALUE_SIZE + CHECKSUM_SIZE;

fn encode_record(key: &TermHash, value: u64) -> [u8; RECORD_SIZE] {
    let mut buf = [0u8; RECORD_SIZE];
    buf[..TERM_HASH_LEN].copy_from_slice(key.as_bytes());
    LittleEndian::write_u64(&mut buf[TERM_HASH_LEN..TERM_HASH_LEN + VALUE_SIZE], value);
    let checksum = xxhash_rust::xxh3::xxh3_64(&buf[..TERM_HASH_LEN + VALUE_SIZE]) as u32;
    LittleEndian::write_u32(&mut buf[TERM_HASH_LEN + VALUE_SIZE..], checksum);
    buf
}

/// Returns the decoded record, or `None` if its checksum does not match.
fn decode_record(buf: &[u8]) -> Option<(TermHash, u64)> {
    let (payload, stored) = buf.split_at(TERM_HASH_LEN + VALUE_SIZE);
    if LittleEndian::read_u32(stored) != xxhash_rust::xxh3::xxh3_64(payload) as u32 {
        return None;
    }
    let key: [u8; TERM_HASH_LEN] = payload[..TERM_HASH_LEN].try_into().ok()?;
    Some((TermHash::from_bytes(key), LittleEndian::read_u64(&payload[TERM_HASH_LEN..])))
}

/// Ordered, append-only key → value index.
pub struct RangeIndex<B: StorageBackend> {
    backend: B,
    map: RwLock<BTreeMap<TermHash, u64>>,
}

impl<B: StorageBackend> RangeIndex<B> {
    /// Opens an index, replaying its record file.
    ///
    /// A torn final record is cut off.
    ///
    /// # Errors
    ///
    /// Returns `Error::ChecksumMismatch` for a damaged record before the tail,
    /// `Error::Corrupted` for a duplicate key, and `Error::Io` if the backend
    /// fails.
    pub fn open(backend: B) -> Result<Self> {
        let total = backend.len();
        let whole = total - total % RECORD_SIZE as u64;
        let bytes = backend.read_at(0, whole as usize)?;

        let mut map = BTreeMap::new();
        let mut valid_end = whole;
        for (i, chunk) in bytes.chunks_exact(RECORD_SIZE).enumerate() {
            let offset = (i * RECORD_SIZE) as u64;
            let Some((key, value)) = decode_record(chunk) else {
                if offset + RECORD_SIZE as u64 == whole {
                    valid_end = offset;
                    break;
                }
                return Err(Error::ChecksumMismatch { offset });
            };
            if map.insert(key, value).is_some() {
                return Err(Error::Corrupted {
                    reason: format!("duplicate range index key {key:?} at offset {offset}"),
                });
            }
        }

        if valid_end < total {
            tracing::warn!(
                offset = valid_end,
                discarded = total - valid_end,
                "Truncating torn range index tail"
            );
            backend.truncate(valid_end)?;
            backend.sync()?;
        }

        Ok(Self { backend, map: RwLock::new(map) })
    }

    /// Returns the value stored under `key`.
    pub fn find(&self, key: &TermHash) -> Option<u64> {
        self.map.read().get(key).copied()
    }

    /// Inserts `key → value`. Returns `false` without writing if `key` exists.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the record cannot be written. A failed write
    /// leaves the record file as it was.
    pub fn insert(&self, key: TermHash, value: u64) -> Result<bool> {
        let mut map = self.map.write();
        if map.contains_key(&key) {
            return Ok(false);
        }
        let end = self.backend.len();
        if let Err(e) = self.backend.append(&encode_record(&key, value)) {
            if let Err(cut) = self.backend.truncate(end) {
                tracing::error!(error = %cut, end, "Failed to cut partial range index record");
            }
            return Err(e);
        }
        map.insert(key, value);
        Ok(true)
    }

    /// Returns all entries in key order.
    pub fn iter(&self) -> std::vec::IntoIter<(TermHash, u64)> {
        let entries: Vec<_> = self.map.read().iter().map(|(k, v)| (*k, *v)).collect();
        entries.into_iter()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// Returns true if the index has no entries.
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Flushes the record file to durable storage.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the sync fails.
    pub fn sync(&self) -> Result<()> {
        self.backend.sync()
    }
}

impl<B: StorageBackend> std::fmt::Debug for RangeIndex<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeIndex").field("len", &self.len()).finish()
    }
}
