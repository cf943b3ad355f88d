//! tripledb-store: append-only storage primitives for the term dictionary.
//!
//! Everything in this crate sits on a [`StorageBackend`], an append-only byte
//! sequence with positional reads:
//!
//! ```text
//! ┌──────────────┐ ┌──────────────┐ ┌──────────────┐
//! │  ObjectLog   │ │  RangeIndex  │ │   Journal    │
//! │ offset→bytes │ │ hash→u64     │ │ typed frames │
//! └──────┬───────┘ └──────┬───────┘ └──────┬───────┘
//!        └────────────────┼────────────────┘
//!               ┌─────────▼─────────┐
//!               │  StorageBackend   │
//!               │ (File / InMemory) │
//!               └───────────────────┘
//! ```
//!
//! Every frame and record carries an XXH3 checksum. On open, a torn final
//! frame left by a crash is truncated; damage anywhere else is reported as
//! [`Error::ChecksumMismatch`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use tripledb_store::{InMemoryBackend, ObjectLog};
//!
//! let log = ObjectLog::open(InMemoryBackend::new())?;
//! let offset = log.append(b"<http://example.org/a>")?;
//! assert_eq!(log.read(offset)?, b"<http://example.org/a>");
//! # Ok::<(), tripledb_store::Error>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod error;
pub mod journal;
pub mod object_log;
pub mod range_index;

pub use backend::{FileBackend, InMemoryBackend, StorageBackend};
pub use error::{Error, Result};
pub use journal::{Journal, JournalEntry, JournalEntryKind};
pub use object_log::{ObjectLog, ObjectLogIter};
pub use range_index::RangeIndex;
