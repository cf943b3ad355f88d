//! Append-only object log.
//!
//! Each entry is framed as
//!
//! ```text
//! ┌──────────────┬──────────────────┬────────────────────────┐
//! │ len: u32 LE  │ bytes: [u8; len] │ xxh3_64(bytes) as u32  │
//! └──────────────┴──────────────────┴────────────────────────┘
//! ```
//!
//! and addressed by the logical offset of its length field. A log may be
//! opened with a base offset, in which case logical offsets start there
//! instead of at zero.
//!
//! The top bit of the length marks a filler frame. Filler reserves a range
//! of offsets without holding an entry: reads of it fail and iteration skips
//! it.

use byteorder::{ByteOrder, LittleEndian};

use crate::{
    backend::StorageBackend,
    error::{Error, Result},
};

const LEN_SIZE: usize = 4;
const CHECKSUM_SIZE: usize = 4;

/// Bytes of framing around every entry.
pub const FRAME_OVERHEAD: usize = LEN_SIZE + CHECKSUM_SIZE;

const FILLER_FLAG: u32 = 1 << 31;

/// Largest entry the log accepts.
pub const MAX_ENTRY_LEN: usize = (FILLER_FLAG - 1) as usize;

/// Payload size of one filler frame; longer ranges are split.
const FILLER_CHUNK: u64 = 1 << 20;

fn checksum(bytes: &[u8]) -> u32 {
    xxhash_rust::xxh3::xxh3_64(bytes) as u32
}

fn frame(bytes: &[u8], flag: u32) -> Vec<u8> {
    let mut frame = vec![0u8; bytes.len() + FRAME_OVERHEAD];
    LittleEndian::write_u32(&mut frame[..LEN_SIZE], bytes.len() as u32 | flag);
    frame[LEN_SIZE..LEN_SIZE + bytes.len()].copy_from_slice(bytes);
    LittleEndian::write_u32(&mut frame[LEN_SIZE + bytes.len()..], checksum(bytes));
    frame
}

/// A verified frame.
enum Frame {
    Entry(Vec<u8>),
    Filler,
}

impl Frame {
    fn payload_len(&self, raw_len: u32) -> u64 {
        match self {
            Frame::Entry(bytes) => bytes.len() as u64,
            Frame::Filler => u64::from(raw_len & !FILLER_FLAG),
        }
    }
}

/// Append-only store of byte strings addressed by offset.
#[derive(Debug)]
pub struct ObjectLog<B: StorageBackend> {
    backend: B,
    base: u64,
}

impl<B: StorageBackend> ObjectLog<B> {
    /// Opens a log whose offsets start at zero.
    ///
    /// A torn final frame left by a crash is cut off.
    ///
    /// # Errors
    ///
    /// Returns `Error::ChecksumMismatch` if a frame before the tail is
    /// damaged, and `Error::Io` if the backend fails.
    pub fn open(backend: B) -> Result<Self> {
        Self::with_base_offset(backend, 0)
    }

    /// Opens a log whose first entry is addressed at `base`.
    ///
    /// # Errors
    ///
    /// As for [`open`](Self::open).
    pub fn with_base_offset(backend: B, base: u64) -> Result<Self> {
        let log = Self { backend, base };
        log.repair_tail()?;
        Ok(log)
    }

    /// Appends `bytes` and returns the offset of the new entry.
    ///
    /// # Errors
    ///
    /// Returns `Error::Corrupted` if the entry is longer than
    /// [`MAX_ENTRY_LEN`], and `Error::Io` if the backend fails.
    pub fn append(&self, bytes: &[u8]) -> Result<u64> {
        if bytes.len() > MAX_ENTRY_LEN {
            return Err(Error::Corrupted {
                reason: format!("object of {} bytes is too large", bytes.len()),
            });
        }
        Ok(self.base + self.backend.append(&frame(bytes, 0))?)
    }

    /// Appends filler so that the next entry lands at `offset`.
    ///
    /// A no-op if the log already ends at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Corrupted` if `offset` lies before the end of the log
    /// or the gap is too small to hold a frame, and `Error::Io` if the
    /// backend fails.
    pub fn fill_to(&self, offset: u64) -> Result<()> {
        let end = self.next_offset();
        let mut gap = offset.checked_sub(end).ok_or_else(|| Error::Corrupted {
            reason: format!("cannot fill to {offset}: log already ends at {end}"),
        })?;
        let overhead = FRAME_OVERHEAD as u64;
        while gap > 0 {
            if gap < overhead {
                return Err(Error::Corrupted {
                    reason: format!("gap of {gap} bytes before {offset} cannot hold a frame"),
                });
            }
            let mut take = gap.min(FILLER_CHUNK + overhead);
            if gap - take > 0 && gap - take < overhead {
                take -= overhead;
            }
            let zeros = vec![0u8; (take - overhead) as usize];
            self.backend.append(&frame(&zeros, FILLER_FLAG))?;
            gap -= take;
        }
        tracing::debug!(from = end, to = offset, "Filled object log range");
        Ok(())
    }

    /// Reads the entry at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Corrupted` if `offset` does not address an entry of
    /// this log, and `Error::ChecksumMismatch` if the entry fails
    /// verification.
    pub fn read(&self, offset: u64) -> Result<Vec<u8>> {
        let physical = offset.checked_sub(self.base).ok_or_else(|| Error::Corrupted {
            reason: format!("offset {offset} precedes log base {}", self.base),
        })?;
        match self.frame_at(physical)?.0 {
            Frame::Entry(bytes) => Ok(bytes),
            Frame::Filler => {
                Err(Error::Corrupted { reason: format!("offset {offset} addresses filler") })
            },
        }
    }

    /// Reads and verifies the frame at a physical position, returning it with
    /// its total length.
    fn frame_at(&self, physical: u64) -> Result<(Frame, u64)> {
        let raw = LittleEndian::read_u32(&self.backend.read_at(physical, LEN_SIZE)?);
        let len = (raw & !FILLER_FLAG) as usize;
        let body = self.backend.read_at(physical + LEN_SIZE as u64, len + CHECKSUM_SIZE)?;
        let (bytes, stored) = body.split_at(len);
        if LittleEndian::read_u32(stored) != checksum(bytes) {
            return Err(Error::ChecksumMismatch { offset: self.base + physical });
        }
        let frame = if raw & FILLER_FLAG == 0 { Frame::Entry(bytes.to_vec()) } else { Frame::Filler };
        let total = frame.payload_len(raw) + FRAME_OVERHEAD as u64;
        Ok((frame, total))
    }

    /// Returns the offset the next appended entry will receive.
    pub fn next_offset(&self) -> u64 {
        self.base + self.backend.len()
    }

    /// Returns the offset of the first entry.
    pub fn base_offset(&self) -> u64 {
        self.base
    }

    /// Returns true if the log holds no entries.
    pub fn is_empty(&self) -> bool {
        self.backend.is_empty()
    }

    /// Iterates over `(offset, bytes)` pairs in write order.
    ///
    /// Entries appended after the iterator is created are not visited.
    pub fn iter(&self) -> ObjectLogIter<'_, B> {
        ObjectLogIter { log: self, next: self.base, end: self.next_offset() }
    }

    /// Discards the entry at `offset` and everything after it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Corrupted` if `offset` lies outside the log, and
    /// `Error::Io` if the truncation fails.
    pub fn truncate(&self, offset: u64) -> Result<()> {
        let physical = offset.checked_sub(self.base).ok_or_else(|| Error::Corrupted {
            reason: format!("offset {offset} precedes log base {}", self.base),
        })?;
        self.backend.truncate(physical)
    }

    /// Flushes the log to durable storage.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the sync fails.
    pub fn sync(&self) -> Result<()> {
        self.backend.sync()
    }

    /// Scans every frame and truncates an incomplete or damaged final frame.
    fn repair_tail(&self) -> Result<()> {
        let total = self.backend.len();
        let mut pos = 0u64;
        while pos < total {
            let remaining = total - pos;
            if remaining < FRAME_OVERHEAD as u64 {
                return self.cut(pos, total);
            }
            let raw = LittleEndian::read_u32(&self.backend.read_at(pos, LEN_SIZE)?);
            let len = u64::from(raw & !FILLER_FLAG);
            let frame_len = len + FRAME_OVERHEAD as u64;
            if frame_len > remaining {
                return self.cut(pos, total);
            }
            let body = self.backend.read_at(pos + LEN_SIZE as u64, len as usize + CHECKSUM_SIZE)?;
            let (bytes, stored) = body.split_at(len as usize);
            if LittleEndian::read_u32(stored) != checksum(bytes) {
                if pos + frame_len == total {
                    return self.cut(pos, total);
                }
                return Err(Error::ChecksumMismatch { offset: self.base + pos });
            }
            pos += frame_len;
        }
        Ok(())
    }

    fn cut(&self, pos: u64, total: u64) -> Result<()> {
        tracing::warn!(
            offset = self.base + pos,
            discarded = total - pos,
            "Truncating torn object log tail"
        );
        self.backend.truncate(pos)?;
        self.backend.sync()
    }
}

/// Iterator over object log entries; see [`ObjectLog::iter`].
pub struct ObjectLogIter<'a, B: StorageBackend> {
    log: &'a ObjectLog<B>,
    next: u64,
    end: u64,
}

impl<B: StorageBackend> Iterator for ObjectLogIter<'_, B> {
    type Item = Result<(u64, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.end {
            let offset = self.next;
            match self.log.frame_at(offset - self.log.base) {
                Ok((Frame::Filler, len)) => self.next = offset + len,
                Ok((Frame::Entry(bytes), len)) => {
                    self.next = offset + len;
                    return Some(Ok((offset, bytes)));
                },
                Err(e) => {
                    self.next = self.end;
                    return Some(Err(e));
                },
            }
        }
        None
    }
}
