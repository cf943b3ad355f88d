//! Reference-counted handles to one table.
//!
//! The base table of a store is reachable from two stacks: the cached stack
//! used for lookups and merges, and a direct handle used by recovery. Each
//! [`SharedNodeTable`] handle releases its reference once on `close`; the
//! underlying table is closed when the last reference is released.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use tripledb_types::{NodeId, Term};

use crate::{
    error::{Error, Result},
    table::{NodeIter, NodeTable},
};

struct SharedInner {
    table: Arc<dyn NodeTable>,
    handles: AtomicUsize,
}

/// One counted handle to a shared table.
///
/// Cloning takes a new handle.
pub struct SharedNodeTable {
    inner: Arc<SharedInner>,
    released: AtomicBool,
}

impl SharedNodeTable {
    /// Takes ownership of `table` and returns its first handle.
    pub fn new(table: Arc<dyn NodeTable>) -> Self {
        Self {
            inner: Arc::new(SharedInner { table, handles: AtomicUsize::new(1) }),
            released: AtomicBool::new(false),
        }
    }

    /// Takes another handle to the same table.
    ///
    /// A handle taken from a released handle is itself released.
    pub fn handle(&self) -> Self {
        let released = self.released.load(Ordering::Acquire);
        if !released {
            self.inner.handles.fetch_add(1, Ordering::AcqRel);
        }
        Self { inner: Arc::clone(&self.inner), released: AtomicBool::new(released) }
    }

    /// Returns the number of unreleased handles.
    pub fn handle_count(&self) -> usize {
        self.inner.handles.load(Ordering::Acquire)
    }

    fn table(&self) -> Result<&dyn NodeTable> {
        if self.released.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(self.inner.table.as_ref())
    }
}

impl Clone for SharedNodeTable {
    fn clone(&self) -> Self {
        self.handle()
    }
}

impl std::fmt::Debug for SharedNodeTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedNodeTable")
            .field("handles", &self.handle_count())
            .field("released", &self.released.load(Ordering::Relaxed))
            .finish()
    }
}

impl NodeTable for SharedNodeTable {
    fn get_or_allocate(&self, term: &Term) -> Result<NodeId> {
        self.table()?.get_or_allocate(term)
    }

    fn lookup_id(&self, term: &Term) -> Result<NodeId> {
        self.table()?.lookup_id(term)
    }

    fn lookup_term(&self, id: NodeId) -> Result<Option<Term>> {
        self.table()?.lookup_term(id)
    }

    fn is_empty(&self) -> Result<bool> {
        self.table()?.is_empty()
    }

    fn all(&self) -> Result<NodeIter<'_>> {
        self.table()?.all()
    }

    fn allocation_offset(&self) -> u64 {
        self.inner.table.allocation_offset()
    }

    fn sync(&self) -> Result<()> {
        self.table()?.sync()
    }

    fn close(&self) -> Result<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if self.inner.handles.fetch_sub(1, Ordering::AcqRel) == 1 {
            tracing::debug!("Last handle released; closing shared table");
            return self.inner.table.close();
        }
        Ok(())
    }
}
