//! Error types for the storage primitives.

use std::io;

use snafu::Snafu;

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the storage layer.
#[derive(Debug, Snafu)]
pub enum Error {
    /// I/O error from the underlying storage backend.
    #[snafu(display("I/O error: {source}"))]
    Io {
        /// The underlying I/O error.
        source: io::Error,
    },

    /// A file is corrupted or an access falls outside its contents.
    #[snafu(display("Corrupted storage: {reason}"))]
    Corrupted {
        /// Description of what was corrupted.
        reason: String,
    },

    /// A frame or record failed checksum verification.
    #[snafu(display("Checksum mismatch at offset {offset}"))]
    ChecksumMismatch {
        /// Logical offset of the failing frame.
        offset: u64,
    },
}

impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        Error::Io { source }
    }
}
