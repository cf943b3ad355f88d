//! Write-ahead journal.
//!
//! Entries are appended sequentially and replayed in write order after a
//! restart. Each frame is
//!
//! ```text
//! ┌──────────┬─────────────┬──────────────────────┬─────────────────────────────┐
//! │ kind: u8 │ len: u32 LE │ payload: [u8; len]   │ xxh3_64(kind‖len‖payload) LE│
//! └──────────┴─────────────┴──────────────────────┴─────────────────────────────┘
//! ```
//!
//! A frame's position is its byte offset in the journal. Grouping entries into
//! transactions is left to the caller; the journal only guarantees that a
//! frame is either fully present and verified or cut off at open.

use byteorder::{ByteOrder, LittleEndian};

use crate::{
    backend::StorageBackend,
    error::{Error, Result},
};

const HEADER_SIZE: usize = 1 + 4;
const CHECKSUM_SIZE: usize = 8;

/// Bytes of framing around every entry.
pub const FRAME_OVERHEAD: usize = HEADER_SIZE + CHECKSUM_SIZE;

/// Kind of a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum JournalEntryKind {
    /// A block of index records.
    Block = 1,
    /// An object to be written to the object log.
    Object = 2,
    /// Marker closing one transaction's group of entries.
    Commit = 3,
}

impl TryFrom<u8> for JournalEntryKind {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Block),
            2 => Ok(Self::Object),
            3 => Ok(Self::Commit),
            _ => Err(Error::Corrupted { reason: format!("invalid journal entry kind: {value}") }),
        }
    }
}

/// A typed journal payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    /// Entry kind.
    pub kind: JournalEntryKind,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

impl JournalEntry {
    /// Creates an entry.
    pub fn new(kind: JournalEntryKind, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }

    fn to_frame(&self) -> Result<Vec<u8>> {
        let len = u32::try_from(self.payload.len()).map_err(|_| Error::Corrupted {
            reason: format!("journal payload of {} bytes is too large", self.payload.len()),
        })?;
        let mut frame = Vec::with_capacity(self.payload.len() + FRAME_OVERHEAD);
        frame.push(self.kind as u8);
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&self.payload);
        let checksum = xxhash_rust::xxh3::xxh3_64(&frame);
        frame.extend_from_slice(&checksum.to_le_bytes());
        Ok(frame)
    }
}

/// Outcome of decoding the frame at a position.
enum Frame {
    /// A verified entry and the total frame length.
    Entry(JournalEntry, u64),
    /// The frame runs past the end of the journal.
    Incomplete,
    /// The frame is complete but fails verification.
    Damaged,
}

/// Sequential, checksummed write-ahead journal.
#[derive(Debug)]
pub struct Journal<B: StorageBackend> {
    backend: B,
}

impl<B: StorageBackend> Journal<B> {
    /// Opens a journal, cutting off a torn final frame.
    ///
    /// # Errors
    ///
    /// Returns `Error::ChecksumMismatch` for a damaged frame before the tail,
    /// and `Error::Io` if the backend fails.
    pub fn open(backend: B) -> Result<Self> {
        let journal = Self { backend };
        let total = journal.backend.len();
        let mut pos = 0u64;
        while pos < total {
            match journal.frame_at(pos)? {
                Frame::Entry(_, frame_len) => pos += frame_len,
                Frame::Damaged if !journal.is_last_frame(pos)? => {
                    return Err(Error::ChecksumMismatch { offset: pos });
                },
                Frame::Incomplete | Frame::Damaged => {
                    tracing::warn!(
                        position = pos,
                        discarded = total - pos,
                        "Truncating torn journal tail"
                    );
                    journal.backend.truncate(pos)?;
                    journal.backend.sync()?;
                    break;
                },
            }
        }
        Ok(journal)
    }

    /// Appends an entry and returns its position.
    ///
    /// The entry is not durable until [`sync`](Self::sync) returns.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the write fails.
    pub fn write(&self, entry: &JournalEntry) -> Result<u64> {
        let position = self.backend.append(&entry.to_frame()?)?;
        tracing::debug!(position, kind = ?entry.kind, len = entry.payload.len(), "Journal write");
        Ok(position)
    }

    /// Reads the entry at `position`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Corrupted` if no complete frame starts at `position`,
    /// and `Error::ChecksumMismatch` if it fails verification.
    pub fn read(&self, position: u64) -> Result<JournalEntry> {
        match self.frame_at(position)? {
            Frame::Entry(entry, _) => Ok(entry),
            Frame::Incomplete => Err(Error::Corrupted {
                reason: format!("no complete journal frame at position {position}"),
            }),
            Frame::Damaged => Err(Error::ChecksumMismatch { offset: position }),
        }
    }

    /// Returns every entry with its position, in write order.
    ///
    /// # Errors
    ///
    /// Returns an error if any frame cannot be read or verified.
    pub fn entries(&self) -> Result<Vec<(u64, JournalEntry)>> {
        let total = self.backend.len();
        let mut pos = 0u64;
        let mut out = Vec::new();
        while pos < total {
            let entry = self.read(pos)?;
            let next = pos + (entry.payload.len() + FRAME_OVERHEAD) as u64;
            out.push((pos, entry));
            pos = next;
        }
        Ok(out)
    }

    /// Returns the position the next entry will be written at.
    pub fn position(&self) -> u64 {
        self.backend.len()
    }

    /// Returns true if the journal holds no entries.
    pub fn is_empty(&self) -> bool {
        self.backend.is_empty()
    }

    /// Flushes the journal to durable storage.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the sync fails.
    pub fn sync(&self) -> Result<()> {
        self.backend.sync()
    }

    /// Discards every entry and syncs the empty journal.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the truncation or sync fails.
    pub fn truncate(&self) -> Result<()> {
        self.backend.truncate(0)?;
        self.backend.sync()
    }

    fn frame_at(&self, pos: u64) -> Result<Frame> {
        let total = self.backend.len();
        if total.saturating_sub(pos) < FRAME_OVERHEAD as u64 {
            return Ok(Frame::Incomplete);
        }
        let header = self.backend.read_at(pos, HEADER_SIZE)?;
        let len = LittleEndian::read_u32(&header[1..]) as usize;
        let frame_len = (len + FRAME_OVERHEAD) as u64;
        if frame_len > total - pos {
            return Ok(Frame::Incomplete);
        }
        let frame = self.backend.read_at(pos, len + FRAME_OVERHEAD)?;
        let (body, stored) = frame.split_at(HEADER_SIZE + len);
        if LittleEndian::read_u64(stored) != xxhash_rust::xxh3::xxh3_64(body) {
            return Ok(Frame::Damaged);
        }
        let Ok(kind) = JournalEntryKind::try_from(header[0]) else {
            return Ok(Frame::Damaged);
        };
        Ok(Frame::Entry(JournalEntry::new(kind, body[HEADER_SIZE..].to_vec()), frame_len))
    }

    fn is_last_frame(&self, pos: u64) -> Result<bool> {
        let header = self.backend.read_at(pos, HEADER_SIZE)?;
        let len = LittleEndian::read_u32(&header[1..]) as u64;
        Ok(pos + len + FRAME_OVERHEAD as u64 == self.backend.len())
    }
}
