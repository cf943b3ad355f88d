//! tripledb-dict: the term dictionary.
//!
//! Maps RDF [`Term`](tripledb_types::Term)s to fixed-width
//! [`NodeId`](tripledb_types::NodeId)s and back, durably, under
//! snapshot-isolated transactions.
//!
//! Every layer implements the [`NodeTable`] capability, and the layers are
//! composed by wrapping:
//!
//! - [`NativeNodeTable`]: range index + object log, the durable mapping
//! - [`CachingNodeTable`]: positive and negative LRU caches
//! - [`SharedNodeTable`]: counted handles to one table
//! - [`TransactionalNodeTable`]: watermark snapshot plus a staging delta
//! - [`InlineNodeTable`]: values packed directly into identifiers
//!
//! [`Store`] ties them together with a journal, recovery, and single-writer
//! admission.
//!
//! ## Quick Start
//!
//! ```no_run
//! use tripledb_dict::{Store, TxnMode};
//! use tripledb_types::Term;
//!
//! let store = Store::open("/tmp/tripledb")?;
//! let mut txn = store.begin(TxnMode::Write)?;
//! let id = txn.get_or_allocate(&Term::uri("http://example.org/alice"))?;
//! txn.commit()?;
//! drop(txn);
//!
//! let reader = store.begin(TxnMode::Read)?;
//! assert_eq!(reader.lookup_term(id)?, Some(Term::uri("http://example.org/alice")));
//! # Ok::<(), tripledb_dict::Error>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod error;
pub mod fault;
pub mod inline;
pub mod native;
pub mod recovery;
pub mod shared;
pub mod store;
pub mod table;
pub mod transaction;
pub mod transactional;

pub use cache::{CacheStats, CachingNodeTable};
pub use error::{Error, Result};
pub use fault::{CommitPoint, FaultInjector};
pub use inline::InlineNodeTable;
pub use native::NativeNodeTable;
pub use recovery::RecoveryReport;
pub use shared::SharedNodeTable;
pub use store::{Store, StoreStats, Transaction};
pub use table::{NodeIter, NodeTable};
pub use transaction::{SnapshotId, TransactionStats, TxnId, TxnMode, TxnState};
pub use transactional::TransactionalNodeTable;
