//! The node table capability.
//!
//! A node table is a bidirectional mapping between [`Term`]s and
//! [`NodeId`]s. The native table stores the mapping; decorators layer
//! caching, inline encoding, shared ownership, and transactional staging on
//! top by wrapping another `Arc<dyn NodeTable>`.

use tripledb_types::{NodeId, Term};

use crate::error::Result;

/// Iterator over `(id, term)` pairs in allocation order.
pub type NodeIter<'a> = Box<dyn Iterator<Item = Result<(NodeId, Term)>> + 'a>;

/// Bidirectional term ↔ identifier mapping.
///
/// All methods take `&self`; implementations synchronize internally.
pub trait NodeTable: Send + Sync {
    /// Returns the identifier for `term`, allocating one if it has none.
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` after [`close`](Self::close),
    /// `Error::UnsupportedOperation` for read-only tables, and storage or
    /// codec errors from the allocation.
    fn get_or_allocate(&self, term: &Term) -> Result<NodeId>;

    /// Returns the identifier for `term`, or [`NodeId::DOES_NOT_EXIST`].
    ///
    /// Never allocates.
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` after [`close`](Self::close), and codec errors
    /// for unencodable terms.
    fn lookup_id(&self, term: &Term) -> Result<NodeId>;

    /// Returns the term for `id`, or `None` if `id` is unknown.
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` after [`close`](Self::close), and storage or
    /// codec errors if the stored term cannot be read.
    fn lookup_term(&self, id: NodeId) -> Result<Option<Term>>;

    /// Returns true if `term` has an identifier.
    ///
    /// # Errors
    ///
    /// As for [`lookup_id`](Self::lookup_id).
    fn contains_term(&self, term: &Term) -> Result<bool> {
        Ok(!self.lookup_id(term)?.is_does_not_exist())
    }

    /// Returns true if `id` maps to a term.
    ///
    /// # Errors
    ///
    /// As for [`lookup_term`](Self::lookup_term).
    fn contains_id(&self, id: NodeId) -> Result<bool> {
        Ok(self.lookup_term(id)?.is_some())
    }

    /// Returns true if no term has been allocated.
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` after [`close`](Self::close).
    fn is_empty(&self) -> Result<bool>;

    /// Iterates over stored `(id, term)` pairs in allocation order.
    ///
    /// Inline identifiers are never stored and never appear.
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` after [`close`](Self::close).
    fn all(&self) -> Result<NodeIter<'_>>;

    /// Returns the object log offset the next allocation will receive.
    fn allocation_offset(&self) -> u64;

    /// Flushes pending writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns storage errors from the flush.
    fn sync(&self) -> Result<()>;

    /// Releases the table. Idempotent; later operations fail with `Error::Closed`.
    ///
    /// # Errors
    ///
    /// Returns storage errors from the final flush.
    fn close(&self) -> Result<()>;
}
