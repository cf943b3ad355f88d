//! Error types for the term dictionary.

use snafu::Snafu;
use tripledb_types::{CodecError, ConfigError};

use crate::fault::CommitPoint;

/// Result type alias for dictionary operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the term dictionary.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// A term could not be encoded or stored bytes could not be decoded.
    #[snafu(display("Codec error: {source}"))]
    Codec {
        /// The underlying codec error.
        source: CodecError,
    },

    /// Index and object log disagree, or an allocation was not reproducible.
    #[snafu(display("Internal consistency violation: {reason}"))]
    InternalConsistency {
        /// Description of the violation.
        reason: String,
    },

    /// Another write transaction holds the writer slot.
    #[snafu(display("Write transaction already in progress"))]
    TransactionConflict,

    /// The operation is not permitted in this context.
    #[snafu(display("Unsupported operation: {operation}"))]
    UnsupportedOperation {
        /// The rejected operation.
        operation: String,
    },

    /// Storage layer failure.
    #[snafu(display("Storage error: {source}"))]
    Storage {
        /// The underlying storage error.
        source: tripledb_store::Error,
    },

    /// Invalid configuration.
    #[snafu(display("Configuration error: {source}"))]
    Config {
        /// The underlying validation error.
        source: ConfigError,
    },

    /// The table, handle, or transaction has been closed.
    #[snafu(display("Closed"))]
    Closed,

    /// The transaction was aborted.
    #[snafu(display("Transaction aborted"))]
    TransactionAborted,

    /// A commit failed after journaling; the store must be reopened.
    #[snafu(display("Store poisoned by a failed commit; reopen to recover"))]
    Poisoned,

    /// A fault injector stopped the commit.
    #[snafu(display("Injected fault at {point:?}"))]
    InjectedFault {
        /// Where the commit was stopped.
        point: CommitPoint,
    },
}

impl From<CodecError> for Error {
    fn from(source: CodecError) -> Self {
        Error::Codec { source }
    }
}

impl From<tripledb_store::Error> for Error {
    fn from(source: tripledb_store::Error) -> Self {
        Error::Storage { source }
    }
}

impl From<ConfigError> for Error {
    fn from(source: ConfigError) -> Self {
        Error::Config { source }
    }
}
