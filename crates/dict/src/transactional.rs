//! Per-transaction view of a base table.
//!
//! A transactional table pairs the base table with a watermark: the base
//! allocation offset captured when the transaction began. Base pointer
//! identifiers at or past the watermark were allocated by later commits and
//! are hidden, which gives every transaction a stable snapshot without
//! copying anything.
//!
//! WRITE transactions also own a staging delta, an in-memory
//! [`NativeNodeTable`] numbered from the base's allocation offset at begin.
//! That offset can exceed the watermark when aborted transactions reserved
//! offsets past the last commit. New terms go only to the delta; on commit
//! they are merged into the base in allocation order, where they receive the
//! same identifiers.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tripledb_store::InMemoryBackend;
use tripledb_types::{NodeId, Term};

use crate::{
    error::{Error, Result},
    native::NativeNodeTable,
    table::{NodeIter, NodeTable},
};

/// Snapshot view of a base table with optional staging.
pub struct TransactionalNodeTable {
    base: Arc<dyn NodeTable>,
    watermark: u64,
    delta: Option<NativeNodeTable<InMemoryBackend>>,
    closed: AtomicBool,
}

impl TransactionalNodeTable {
    /// Creates a read-only view of `base` as of `watermark`.
    pub fn new_read(base: Arc<dyn NodeTable>, watermark: u64) -> Self {
        Self { base, watermark, delta: None, closed: AtomicBool::new(false) }
    }

    /// Creates a writable view of `base` as of `watermark` whose staged
    /// identifiers start at `staging_offset`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InternalConsistency` if `staging_offset` precedes
    /// `watermark`, and `Error::Storage` if the staging delta cannot be
    /// created.
    pub fn new_write(
        base: Arc<dyn NodeTable>,
        watermark: u64,
        staging_offset: u64,
    ) -> Result<Self> {
        if staging_offset < watermark {
            return Err(Error::InternalConsistency {
                reason: format!("staging offset {staging_offset} precedes watermark {watermark}"),
            });
        }
        let delta = NativeNodeTable::with_base_offset(
            InMemoryBackend::new(),
            InMemoryBackend::new(),
            staging_offset,
        )?;
        Ok(Self { base, watermark, delta: Some(delta), closed: AtomicBool::new(false) })
    }

    /// Returns the snapshot watermark.
    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    /// Returns the staging delta of a writable view.
    pub fn delta(&self) -> Option<&NativeNodeTable<InMemoryBackend>> {
        self.delta.as_ref()
    }

    /// Returns true if `id` is visible in the base at this snapshot.
    fn visible_in_base(&self, id: NodeId) -> bool {
        id.offset().map_or(true, |offset| offset < self.watermark)
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn base_lookup_id(&self, term: &Term) -> Result<NodeId> {
        let id = self.base.lookup_id(term)?;
        if self.visible_in_base(id) {
            Ok(id)
        } else {
            Ok(NodeId::DOES_NOT_EXIST)
        }
    }
}

impl NodeTable for TransactionalNodeTable {
    fn get_or_allocate(&self, term: &Term) -> Result<NodeId> {
        self.check_open()?;
        let Some(delta) = &self.delta else {
            return Err(Error::UnsupportedOperation {
                operation: "get_or_allocate in a READ transaction".to_string(),
            });
        };
        if term.is_any() {
            return Ok(NodeId::ANY);
        }
        let staged = delta.lookup_id(term)?;
        if !staged.is_does_not_exist() {
            return Ok(staged);
        }
        let existing = self.base_lookup_id(term)?;
        if !existing.is_does_not_exist() {
            return Ok(existing);
        }
        delta.get_or_allocate(term)
    }

    fn lookup_id(&self, term: &Term) -> Result<NodeId> {
        self.check_open()?;
        if let Some(delta) = &self.delta {
            let staged = delta.lookup_id(term)?;
            if !staged.is_does_not_exist() {
                return Ok(staged);
            }
        }
        self.base_lookup_id(term)
    }

    fn lookup_term(&self, id: NodeId) -> Result<Option<Term>> {
        self.check_open()?;
        if self.visible_in_base(id) {
            return self.base.lookup_term(id);
        }
        match &self.delta {
            Some(delta) => delta.lookup_term(id),
            None => Ok(None),
        }
    }

    fn is_empty(&self) -> Result<bool> {
        self.check_open()?;
        let delta_empty = match &self.delta {
            Some(delta) => delta.is_empty()?,
            None => true,
        };
        Ok(self.watermark == 0 && delta_empty)
    }

    fn all(&self) -> Result<NodeIter<'_>> {
        self.check_open()?;
        let watermark = self.watermark;
        let base = self.base.all()?.take_while(move |entry| match entry {
            Ok((id, _)) => id.offset().is_some_and(|offset| offset < watermark),
            Err(_) => true,
        });
        match &self.delta {
            Some(delta) => Ok(Box::new(base.chain(delta.all()?))),
            None => Ok(Box::new(base)),
        }
    }

    fn allocation_offset(&self) -> u64 {
        self.delta.as_ref().map_or(self.watermark, |delta| delta.allocation_offset())
    }

    fn sync(&self) -> Result<()> {
        self.check_open()
    }

    /// Discards the staging delta. The base table is left open.
    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match &self.delta {
            Some(delta) => delta.close(),
            None => Ok(()),
        }
    }
}
