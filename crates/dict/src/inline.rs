//! Inline-value decorator.
//!
//! The outermost layer of every table stack. Terms whose value fits in an
//! identifier never reach the wrapped table: their identifier is computed
//! from the value and decoded back from the identifier.

use std::sync::Arc;

use tripledb_types::{NodeId, Term, inline};

use crate::{
    error::Result,
    table::{NodeIter, NodeTable},
};

/// Node table decorator that handles inline values and special identifiers.
pub struct InlineNodeTable {
    inner: Arc<dyn NodeTable>,
}

impl InlineNodeTable {
    /// Wraps `inner`.
    pub fn new(inner: Arc<dyn NodeTable>) -> Self {
        Self { inner }
    }

    /// Resolves `term` without consulting the wrapped table, if possible.
    fn direct_id(term: &Term) -> Option<NodeId> {
        if term.is_any() {
            return Some(NodeId::ANY);
        }
        inline::encode(term)
    }
}

impl NodeTable for InlineNodeTable {
    fn get_or_allocate(&self, term: &Term) -> Result<NodeId> {
        match Self::direct_id(term) {
            Some(id) => Ok(id),
            None => self.inner.get_or_allocate(term),
        }
    }

    fn lookup_id(&self, term: &Term) -> Result<NodeId> {
        match Self::direct_id(term) {
            Some(id) => Ok(id),
            None => self.inner.lookup_id(term),
        }
    }

    fn lookup_term(&self, id: NodeId) -> Result<Option<Term>> {
        if id.is_any() {
            return Ok(Some(Term::Any));
        }
        if id.is_does_not_exist() {
            return Ok(None);
        }
        if id.is_inline() {
            return Ok(inline::decode(id));
        }
        self.inner.lookup_term(id)
    }

    fn is_empty(&self) -> Result<bool> {
        self.inner.is_empty()
    }

    fn all(&self) -> Result<NodeIter<'_>> {
        self.inner.all()
    }

    fn allocation_offset(&self) -> u64 {
        self.inner.allocation_offset()
    }

    fn sync(&self) -> Result<()> {
        self.inner.sync()
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }
}
