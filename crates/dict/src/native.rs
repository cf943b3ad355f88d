//! The native node table.
//!
//! Combines a [`RangeIndex`] (term hash → identifier) with an [`ObjectLog`]
//! (offset → encoded term). A term's pointer identifier is the object log
//! offset of its encoding.
//!
//! Allocation holds one mutex across lookup and append so two callers racing
//! on the same new term cannot both allocate it. The object is appended
//! before its index record. If the index insert fails the object is cut off
//! again; a crash between the two leaves an orphaned tail object, which
//! [`NativeNodeTable::open`] cuts off.
//!
//! [`NativeNodeTable::pad_to`] reserves offsets with object log filler.
//! Offsets inside filler never resolve to a term and are never handed out.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tripledb_store::{InMemoryBackend, ObjectLog, RangeIndex, StorageBackend};
use tripledb_types::{NodeId, Term, TermHash, codec};

use crate::{
    error::{Error, Result},
    table::{NodeIter, NodeTable},
};

/// Base term ↔ identifier mapping backed by a range index and an object log.
pub struct NativeNodeTable<B: StorageBackend> {
    index: RangeIndex<B>,
    objects: ObjectLog<B>,
    /// Serializes lookup-then-allocate.
    alloc_lock: Mutex<()>,
    closed: AtomicBool,
}

impl NativeNodeTable<InMemoryBackend> {
    /// Creates an empty in-memory table.
    ///
    /// # Errors
    ///
    /// Infallible in practice; shares the signature of [`open`](Self::open).
    pub fn in_memory() -> Result<Self> {
        Self::open(InMemoryBackend::new(), InMemoryBackend::new())
    }
}

impl<B: StorageBackend> NativeNodeTable<B> {
    /// Opens a table over an index backend and an object backend.
    ///
    /// Objects at the tail of the log with no index record (left by a crash
    /// mid-allocation) are discarded.
    ///
    /// # Errors
    ///
    /// Returns `Error::InternalConsistency` if the index and object log
    /// disagree anywhere but the tail, and `Error::Storage` for I/O or
    /// checksum failures.
    pub fn open(index: B, objects: B) -> Result<Self> {
        let table = Self::from_parts(RangeIndex::open(index)?, ObjectLog::open(objects)?);
        table.reconcile()?;
        Ok(table)
    }

    /// Creates an empty table whose first identifier is `base`.
    ///
    /// Used for staging tables: with `base` set to the allocation offset of
    /// the table the stage will be merged into, staged identifiers equal the
    /// identifiers the merge assigns.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the backends cannot be opened.
    pub fn with_base_offset(index: B, objects: B, base: u64) -> Result<Self> {
        Ok(Self::from_parts(RangeIndex::open(index)?, ObjectLog::with_base_offset(objects, base)?))
    }

    fn from_parts(index: RangeIndex<B>, objects: ObjectLog<B>) -> Self {
        Self { index, objects, alloc_lock: Mutex::new(()), closed: AtomicBool::new(false) }
    }

    /// Returns every index record, ordered by key.
    pub fn records(&self) -> Vec<(TermHash, NodeId)> {
        self.index.iter().map(|(k, v)| (k, NodeId::from_raw(v))).collect()
    }

    /// Returns the identifier recorded under `key`.
    pub fn find_record(&self, key: &TermHash) -> Option<NodeId> {
        self.index.find(key).map(NodeId::from_raw)
    }

    /// Returns every stored object as `(id, encoded term)` in allocation order.
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` after close and `Error::Storage` on read failure.
    pub fn encoded_entries(&self) -> Result<Vec<(NodeId, Vec<u8>)>> {
        self.check_open()?;
        self.objects
            .iter()
            .map(|entry| {
                let (offset, bytes) = entry?;
                Ok((pointer_id(offset)?, bytes))
            })
            .collect()
    }

    /// Reserves every offset below `offset`, so the next allocation
    /// receives `offset` or later.
    ///
    /// A no-op if the table already extends to `offset`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` after close and `Error::Storage` if the filler
    /// cannot be written.
    pub fn pad_to(&self, offset: u64) -> Result<()> {
        self.check_open()?;
        let _guard = self.alloc_lock.lock();
        if offset <= self.objects.next_offset() {
            return Ok(());
        }
        self.objects.fill_to(offset)?;
        Ok(())
    }

    /// Returns the number of stored terms.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Cuts unindexed objects from the tail of the log and checks that every
    /// index record points at a stored object.
    fn reconcile(&self) -> Result<()> {
        let mut indexed = 0usize;
        let mut orphan_start = None;
        for entry in self.objects.iter() {
            let (offset, bytes) = entry?;
            let recorded = self.index.find(&TermHash::from_encoded(&bytes)?);
            match (recorded == Some(offset), orphan_start) {
                (true, None) => indexed += 1,
                (true, Some(start)) => {
                    return Err(Error::InternalConsistency {
                        reason: format!(
                            "indexed object at {offset} follows unindexed object at {start}"
                        ),
                    });
                },
                (false, None) => orphan_start = Some(offset),
                (false, Some(_)) => {},
            }
        }
        if let Some(start) = orphan_start {
            tracing::warn!(
                offset = start,
                end = self.objects.next_offset(),
                "Discarding unindexed objects at object log tail"
            );
            self.objects.truncate(start)?;
            self.objects.sync()?;
        }
        if indexed != self.index.len() {
            return Err(Error::InternalConsistency {
                reason: format!(
                    "range index holds {} records but object log holds {indexed} indexed objects",
                    self.index.len()
                ),
            });
        }
        Ok(())
    }
}

fn pointer_id(offset: u64) -> Result<NodeId> {
    NodeId::from_offset(offset).ok_or_else(|| Error::InternalConsistency {
        reason: format!("object log offset {offset} exceeds identifier range"),
    })
}

impl<B: StorageBackend> NodeTable for NativeNodeTable<B> {
    fn get_or_allocate(&self, term: &Term) -> Result<NodeId> {
        self.check_open()?;
        if term.is_any() {
            return Ok(NodeId::ANY);
        }
        let encoded = codec::encode_to_vec(term)?;
        let key = TermHash::from_encoded(&encoded)?;

        let _guard = self.alloc_lock.lock();
        if let Some(raw) = self.index.find(&key) {
            return Ok(NodeId::from_raw(raw));
        }
        let offset = self.objects.append(&encoded)?;
        let indexed = pointer_id(offset).and_then(|id| match self.index.insert(key, id.raw()) {
            Ok(true) => Ok(id),
            Ok(false) => {
                tracing::error!(?key, %term, "Range index already holds a record for a new term");
                Err(Error::InternalConsistency {
                    reason: format!("duplicate range index record for {term}"),
                })
            },
            Err(e) => Err(e.into()),
        });
        if indexed.is_err() {
            if let Err(e) = self.objects.truncate(offset) {
                tracing::error!(offset, error = %e, "Failed to cut unindexed object");
            }
        }
        indexed
    }

    fn lookup_id(&self, term: &Term) -> Result<NodeId> {
        self.check_open()?;
        if term.is_any() {
            return Ok(NodeId::ANY);
        }
        let key = tripledb_types::term_hash(term)?;
        Ok(self.index.find(&key).map_or(NodeId::DOES_NOT_EXIST, NodeId::from_raw))
    }

    fn lookup_term(&self, id: NodeId) -> Result<Option<Term>> {
        self.check_open()?;
        if id.is_any() {
            return Ok(Some(Term::Any));
        }
        let Some(offset) = id.offset() else {
            return Ok(None);
        };
        if offset < self.objects.base_offset() || offset >= self.objects.next_offset() {
            return Ok(None);
        }
        let bytes = match self.objects.read(offset) {
            Ok(bytes) => bytes,
            Err(e @ tripledb_store::Error::Io { .. }) => return Err(e.into()),
            // Filler, or an offset inside an entry.
            Err(_) => return Ok(None),
        };
        let Ok(term) = codec::decode(&bytes) else {
            return Ok(None);
        };
        if self.index.find(&TermHash::from_encoded(&bytes)?) != Some(offset) {
            return Ok(None);
        }
        Ok(Some(term))
    }

    fn is_empty(&self) -> Result<bool> {
        self.check_open()?;
        Ok(self.index.is_empty())
    }

    fn all(&self) -> Result<NodeIter<'_>> {
        self.check_open()?;
        Ok(Box::new(self.objects.iter().map(|entry| {
            let (offset, bytes) = entry?;
            Ok((pointer_id(offset)?, codec::decode(&bytes)?))
        })))
    }

    fn allocation_offset(&self) -> u64 {
        self.objects.next_offset()
    }

    fn sync(&self) -> Result<()> {
        self.check_open()?;
        self.objects.sync()?;
        self.index.sync()?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.objects.sync()?;
        self.index.sync()?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use tripledb_test_utils::TestDir;
    use tripledb_store::FileBackend;
    use tripledb_types::xsd;

    use super::*;

    fn table() -> NativeNodeTable<InMemoryBackend> {
        NativeNodeTable::in_memory().unwrap()
    }

    #[test]
    fn test_allocate_is_idempotent() {
        let table = table();
        let term = Term::uri("http://example.org/a");
        let id = table.get_or_allocate(&term).unwrap();
        assert!(id.is_pointer());
        assert_eq!(table.get_or_allocate(&term).unwrap(), id);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_bidirectional_lookup() {
        let table = table();
        let terms = [
            Term::uri("http://example.org/a"),
            Term::blank("b1"),
            Term::lang("chat", "fr"),
            Term::typed("x", xsd::STRING),
        ];
        let ids: Vec<_> = terms.iter().map(|t| table.get_or_allocate(t).unwrap()).collect();
        for (term, id) in terms.iter().zip(&ids) {
            assert_eq!(table.lookup_id(term).unwrap(), *id);
            assert_eq!(table.lookup_term(*id).unwrap().as_ref(), Some(term));
        }
        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), ids.len());
    }

    #[test]
    fn test_lookup_never_allocates() {
        let table = table();
        let term = Term::uri("http://example.org/missing");
        assert_eq!(table.lookup_id(&term).unwrap(), NodeId::DOES_NOT_EXIST);
        assert!(!table.contains_term(&term).unwrap());
        assert!(table.is_empty().unwrap());
        assert_eq!(table.allocation_offset(), 0);
    }

    #[test]
    fn test_special_ids() {
        let table = table();
        assert_eq!(table.get_or_allocate(&Term::Any).unwrap(), NodeId::ANY);
        assert_eq!(table.lookup_id(&Term::Any).unwrap(), NodeId::ANY);
        assert_eq!(table.lookup_term(NodeId::ANY).unwrap(), Some(Term::Any));
        assert_eq!(table.lookup_term(NodeId::DOES_NOT_EXIST).unwrap(), None);
        assert!(table.is_empty().unwrap());
    }

    #[test]
    fn test_unknown_pointer_is_absent() {
        let table = table();
        let id = table.get_or_allocate(&Term::plain("x")).unwrap();
        let beyond = NodeId::from_offset(table.allocation_offset() + 100).unwrap();
        assert!(!table.contains_id(beyond).unwrap());
        assert!(table.contains_id(id).unwrap());
    }

    #[test]
    fn test_offset_inside_entry_is_absent() {
        let table = table();
        let id = table.get_or_allocate(&Term::uri("http://example.org/a")).unwrap();
        let inside = NodeId::from_offset(3).unwrap();
        assert_eq!(table.lookup_term(inside).unwrap(), None);
        assert!(!table.contains_id(inside).unwrap());
        assert!(table.contains_id(id).unwrap());
    }

    #[test]
    fn test_all_in_allocation_order() {
        let table = table();
        let terms: Vec<_> = (0..5).map(|i| Term::uri(format!("http://example.org/{i}"))).collect();
        for t in &terms {
            table.get_or_allocate(t).unwrap();
        }
        let listed: Vec<Term> = table.all().unwrap().map(|r| r.unwrap().1).collect();
        assert_eq!(listed, terms);
    }

    #[test]
    fn test_base_offset_numbering() {
        let table =
            NativeNodeTable::with_base_offset(InMemoryBackend::new(), InMemoryBackend::new(), 500)
                .unwrap();
        let id = table.get_or_allocate(&Term::plain("staged")).unwrap();
        assert_eq!(id.offset(), Some(500));
        assert_eq!(table.lookup_term(NodeId::from_offset(10).unwrap()).unwrap(), None);
        assert_eq!(table.records().len(), 1);
        assert_eq!(table.find_record(&tripledb_types::term_hash(&Term::plain("staged")).unwrap()), Some(id));
    }

    #[test]
    fn test_closed_table_rejects_operations() {
        let table = table();
        table.close().unwrap();
        table.close().unwrap();
        assert!(matches!(table.get_or_allocate(&Term::plain("x")), Err(Error::Closed)));
        assert!(matches!(table.lookup_id(&Term::plain("x")), Err(Error::Closed)));
        assert!(matches!(table.all(), Err(Error::Closed)));
    }

    #[test]
    fn test_unencodable_term_is_codec_error() {
        let table = table();
        assert!(matches!(table.get_or_allocate(&Term::lang("x", "not valid")), Err(Error::Codec { .. })));
    }

    #[test]
    fn test_reopen_from_files() {
        let dir = TestDir::new();
        let (idn, dat) = (dir.join("nodes.idn"), dir.join("nodes.dat"));
        let id;
        {
            let table =
                NativeNodeTable::open(FileBackend::open(&idn).unwrap(), FileBackend::open(&dat).unwrap())
                    .unwrap();
            id = table.get_or_allocate(&Term::uri("http://example.org/p")).unwrap();
            table.close().unwrap();
        }
        let table =
            NativeNodeTable::open(FileBackend::open(&idn).unwrap(), FileBackend::open(&dat).unwrap())
                .unwrap();
        assert_eq!(table.lookup_id(&Term::uri("http://example.org/p")).unwrap(), id);
    }

    #[test]
    fn test_orphan_tail_object_is_discarded() {
        let index = Arc::new(InMemoryBackend::new());
        let objects = Arc::new(InMemoryBackend::new());
        {
            let table = NativeNodeTable::open(Arc::clone(&index), Arc::clone(&objects)).unwrap();
            table.get_or_allocate(&Term::plain("indexed")).unwrap();
        }
        let kept = objects.len();
        // An object appended without its index record.
        let log = ObjectLog::open(Arc::clone(&objects)).unwrap();
        log.append(&codec::encode_to_vec(&Term::plain("orphan")).unwrap()).unwrap();

        let table = NativeNodeTable::open(Arc::clone(&index), Arc::clone(&objects)).unwrap();
        assert_eq!(table.allocation_offset(), kept);
        assert_eq!(table.all().unwrap().count(), 1);
        let id = table.get_or_allocate(&Term::plain("orphan")).unwrap();
        assert_eq!(id.offset(), Some(kept));
    }

    #[test]
    fn test_index_without_object_is_inconsistent() {
        let index = Arc::new(InMemoryBackend::new());
        {
            let table =
                NativeNodeTable::open(Arc::clone(&index), Arc::new(InMemoryBackend::new())).unwrap();
            table.get_or_allocate(&Term::plain("lost")).unwrap();
        }
        let result = NativeNodeTable::open(Arc::clone(&index), Arc::new(InMemoryBackend::new()));
        assert!(matches!(result, Err(Error::InternalConsistency { .. })));
    }

    // =========================================================================
    // Padding and failed allocation
    // =========================================================================

    #[test]
    fn test_pad_reserves_offsets() {
        let index = Arc::new(InMemoryBackend::new());
        let objects = Arc::new(InMemoryBackend::new());
        let (end, next) = {
            let table = NativeNodeTable::open(Arc::clone(&index), Arc::clone(&objects)).unwrap();
            table.get_or_allocate(&Term::plain("a")).unwrap();
            let end = table.allocation_offset();
            table.pad_to(end + 40).unwrap();
            table.pad_to(end).unwrap();
            assert_eq!(table.allocation_offset(), end + 40);

            let next = table.get_or_allocate(&Term::plain("b")).unwrap();
            assert_eq!(next.offset(), Some(end + 40));
            assert_eq!(table.lookup_term(NodeId::from_offset(end).unwrap()).unwrap(), None);
            (end, next)
        };

        let table = NativeNodeTable::open(Arc::clone(&index), Arc::clone(&objects)).unwrap();
        let listed: Vec<Term> = table.all().unwrap().map(|r| r.unwrap().1).collect();
        assert_eq!(listed, vec![Term::plain("a"), Term::plain("b")]);
        assert_eq!(table.lookup_id(&Term::plain("b")).unwrap(), next);
        assert!(!table.contains_id(NodeId::from_offset(end).unwrap()).unwrap());
    }

    #[test]
    fn test_trailing_pad_survives_reopen() {
        let index = Arc::new(InMemoryBackend::new());
        let objects = Arc::new(InMemoryBackend::new());
        {
            let table = NativeNodeTable::open(Arc::clone(&index), Arc::clone(&objects)).unwrap();
            table.pad_to(64).unwrap();
        }
        let table = NativeNodeTable::open(Arc::clone(&index), Arc::clone(&objects)).unwrap();
        assert_eq!(table.allocation_offset(), 64);
        assert!(table.is_empty().unwrap());
        assert_eq!(table.get_or_allocate(&Term::plain("x")).unwrap().offset(), Some(64));
    }

    /// Backend whose appends fail while `fail` is set.
    struct FlakyBackend {
        inner: Arc<InMemoryBackend>,
        fail: Arc<AtomicBool>,
    }

    impl FlakyBackend {
        fn new(inner: &Arc<InMemoryBackend>, fail: &Arc<AtomicBool>) -> Self {
            Self { inner: Arc::clone(inner), fail: Arc::clone(fail) }
        }
    }

    impl StorageBackend for FlakyBackend {
        fn read_at(&self, offset: u64, len: usize) -> tripledb_store::Result<Vec<u8>> {
            self.inner.read_at(offset, len)
        }

        fn append(&self, data: &[u8]) -> tripledb_store::Result<u64> {
            if self.fail.load(Ordering::Acquire) {
                return Err(std::io::Error::other("injected append failure").into());
            }
            self.inner.append(data)
        }

        fn len(&self) -> u64 {
            self.inner.len()
        }

        fn truncate(&self, len: u64) -> tripledb_store::Result<()> {
            self.inner.truncate(len)
        }

        fn sync(&self) -> tripledb_store::Result<()> {
            self.inner.sync()
        }
    }

    #[test]
    fn test_failed_index_insert_cuts_object() {
        let index = Arc::new(InMemoryBackend::new());
        let objects = Arc::new(InMemoryBackend::new());
        let index_fails = Arc::new(AtomicBool::new(false));
        let objects_fail = Arc::new(AtomicBool::new(false));
        {
            let table = NativeNodeTable::open(
                FlakyBackend::new(&index, &index_fails),
                FlakyBackend::new(&objects, &objects_fail),
            )
            .unwrap();
            index_fails.store(true, Ordering::Release);
            assert!(matches!(
                table.get_or_allocate(&Term::plain("A")),
                Err(Error::Storage { .. })
            ));
            assert_eq!(table.allocation_offset(), 0);
            assert_eq!(table.lookup_id(&Term::plain("A")).unwrap(), NodeId::DOES_NOT_EXIST);

            index_fails.store(false, Ordering::Release);
            let b = table.get_or_allocate(&Term::plain("B")).unwrap();
            assert_eq!(b.offset(), Some(0));
        }

        let table = NativeNodeTable::open(Arc::clone(&index), Arc::clone(&objects)).unwrap();
        assert_eq!(table.lookup_id(&Term::plain("A")).unwrap(), NodeId::DOES_NOT_EXIST);
        let b = table.lookup_id(&Term::plain("B")).unwrap();
        assert_eq!(table.lookup_term(b).unwrap(), Some(Term::plain("B")));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_concurrent_allocation_of_same_term() {
        let table = Arc::new(table());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    table.get_or_allocate(&Term::uri("http://example.org/shared")).unwrap()
                })
            })
            .collect();
        let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(table.len(), 1);
    }
}
