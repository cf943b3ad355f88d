//! Transaction manager.
//!
//! A [`Store`] owns the base node table of one location together with its
//! journal, and hands out [`Transaction`]s.
//!
//! ```text
//!                 Transaction view
//!       ┌──────────────────────────────────┐
//!       │ InlineNodeTable                  │
//!       │   └─ TransactionalNodeTable      │──── staging delta (WRITE only)
//!       └──────────────┬───────────────────┘
//!                      │ base
//!            ┌─────────▼─────────┐
//!            │ CachingNodeTable  │
//!            └─────────┬─────────┘
//!            ┌─────────▼─────────┐     ┌──────────────────┐
//!            │ SharedNodeTable   │◄────┤ direct handle    │ (recovery)
//!            └─────────┬─────────┘     └──────────────────┘
//!            ┌─────────▼─────────┐
//!            │ NativeNodeTable   │  nodes.idn + nodes.dat
//!            └───────────────────┘
//! ```
//!
//! # Concurrency
//!
//! Any number of READ transactions may be active. At most one WRITE
//! transaction is active; a second `begin(Write)` fails with
//! [`Error::TransactionConflict`] unless the configured admission timeout
//! lets it wait. Readers never block the writer: each transaction reads
//! through the watermark captured at begin, and commits publish a new
//! [`CommittedState`] with an atomic pointer swap.
//!
//! # Commit
//!
//! 1. Journal one `Object` entry per staged term, one `Block` entry, and a `Commit` marker
//! 2. Sync the journal
//! 3. Merge each staged term into the base, checking the base assigns the staged identifier
//! 4. Sync the base and truncate the journal (if `sync_on_commit`)
//! 5. Publish the new committed state
//!
//! A failure from step 1 onward poisons the store. Reopening replays the
//! journal and restores a consistent base. Without `sync_on_commit` the
//! journal keeps every group until [`Store::close`] syncs the base.
//!
//! # Identifier reservation
//!
//! Staged identifiers are numbered from the base's allocation offset at
//! begin. Aborting a WRITE transaction that staged terms pads the base past
//! its staged range, so an identifier handed out once never names a
//! different term later.

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use arc_swap::ArcSwap;
use parking_lot::RwLock;
use tripledb_store::{FileBackend, InMemoryBackend, Journal, StorageBackend};
use tripledb_types::{NodeId, StoreConfig, Term, TermHash, codec};

use crate::{
    cache::{CacheStats, CachingNodeTable},
    error::{Error, Result},
    fault::{CommitPoint, FaultInjector},
    inline::InlineNodeTable,
    native::NativeNodeTable,
    recovery::{self, RecoveryReport},
    shared::SharedNodeTable,
    table::{NodeIter, NodeTable},
    transaction::{
        CommittedState, SnapshotId, TransactionStats, TransactionTracker, TxnId, TxnMode,
        TxnState,
    },
    transactional::TransactionalNodeTable,
};

/// File holding the range index.
pub const INDEX_FILE: &str = "nodes.idn";
/// File holding the object log.
pub const OBJECTS_FILE: &str = "nodes.dat";
/// File holding the journal.
pub const JOURNAL_FILE: &str = "journal.jrnl";

/// Store statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Transaction counters.
    pub transactions: TransactionStats,
    /// Cache counters of the base stack.
    pub cache: CacheStats,
    /// Committed base allocation offset.
    pub watermark: u64,
    /// Number of commits published since open.
    pub snapshot_id: SnapshotId,
    /// Whether a failed commit or abort poisoned the store.
    pub poisoned: bool,
}

/// A term dictionary with snapshot-isolated transactions.
pub struct Store<B: StorageBackend + 'static> {
    config: StoreConfig,
    location: Option<PathBuf>,
    native: Arc<NativeNodeTable<B>>,
    /// Cached stack over one shared handle; base of every transaction.
    cached: Arc<CachingNodeTable>,
    /// Second handle to the base, bypassing the cache.
    direct: SharedNodeTable,
    journal: Journal<B>,
    committed: ArcSwap<CommittedState>,
    tracker: TransactionTracker,
    recovery: RecoveryReport,
    fault_injector: RwLock<Option<Arc<dyn FaultInjector>>>,
    poisoned: AtomicBool,
    closed: AtomicBool,
}

impl Store<FileBackend> {
    /// Opens (or creates) the store at `location` with default configuration.
    ///
    /// # Errors
    ///
    /// As for [`open_with_config`](Self::open_with_config).
    pub fn open(location: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(location, StoreConfig::default())
    }

    /// Opens (or creates) the store at `location`, replaying its journal.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an invalid configuration, `Error::Storage`
    /// if the files cannot be opened or are damaged, and
    /// `Error::InternalConsistency` if the journal does not replay cleanly.
    pub fn open_with_config(location: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        let location = location.as_ref();
        std::fs::create_dir_all(location).map_err(tripledb_store::Error::from)?;
        let mut store = Self::from_backends(
            FileBackend::open(location.join(INDEX_FILE))?,
            FileBackend::open(location.join(OBJECTS_FILE))?,
            FileBackend::open(location.join(JOURNAL_FILE))?,
            config,
        )?;
        store.location = Some(location.to_path_buf());
        Ok(store)
    }
}

impl Store<InMemoryBackend> {
    /// Creates an empty, non-durable store.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an invalid configuration.
    pub fn open_in_memory(config: StoreConfig) -> Result<Self> {
        Self::from_backends(
            InMemoryBackend::new(),
            InMemoryBackend::new(),
            InMemoryBackend::new(),
            config,
        )
    }
}

impl<B: StorageBackend + 'static> Store<B> {
    /// Opens a store over explicit backends, replaying the journal.
    ///
    /// # Errors
    ///
    /// As for [`Store::open_with_config`].
    pub fn from_backends(index: B, objects: B, journal: B, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let native = Arc::new(NativeNodeTable::open(index, objects)?);
        let shared = SharedNodeTable::new(Arc::clone(&native) as Arc<dyn NodeTable>);
        let direct = shared.handle();
        let cached = Arc::new(CachingNodeTable::new(Arc::new(shared), &config));
        let journal = Journal::open(journal)?;

        let recovery = recovery::replay(&journal, &direct, &native)?;
        if recovery.had_journal() || !journal.is_empty() {
            direct.sync()?;
            journal.truncate()?;
            tracing::info!(
                groups = recovery.groups_replayed,
                terms = recovery.terms_replayed,
                discarded = recovery.entries_discarded,
                "Recovered store from journal"
            );
        }

        let committed =
            CommittedState { watermark: native.allocation_offset(), snapshot_id: SnapshotId(0) };
        tracing::info!(terms = native.len(), watermark = committed.watermark, "Store opened");

        Ok(Self {
            config,
            location: None,
            native,
            cached,
            direct,
            journal,
            committed: ArcSwap::from_pointee(committed),
            tracker: TransactionTracker::new(),
            recovery,
            fault_injector: RwLock::new(None),
            poisoned: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the directory the store was opened at, if file-backed.
    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    /// Returns the configuration the store was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns what journal replay did when the store was opened.
    pub fn recovery_report(&self) -> RecoveryReport {
        self.recovery
    }

    /// Returns true if a failed commit poisoned the store.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Installs a fault injector consulted at every [`CommitPoint`].
    pub fn set_fault_injector(&self, injector: Arc<dyn FaultInjector>) {
        *self.fault_injector.write() = Some(injector);
    }

    /// Removes the fault injector.
    pub fn clear_fault_injector(&self) {
        *self.fault_injector.write() = None;
    }

    /// Begins a transaction.
    ///
    /// WRITE admission waits up to the configured `write_admission_timeout`.
    ///
    /// # Errors
    ///
    /// Returns `Error::TransactionConflict` if another WRITE transaction is
    /// active, `Error::Poisoned` after a failed commit, and `Error::Closed`
    /// after [`close`](Self::close).
    pub fn begin(&self, mode: TxnMode) -> Result<Transaction<'_, B>> {
        match mode {
            TxnMode::Read => self.begin_read(),
            TxnMode::Write => self.begin_write_timeout(self.config.write_admission_timeout),
        }
    }

    /// Begins a WRITE transaction, waiting up to `timeout` for the writer slot.
    ///
    /// # Errors
    ///
    /// As for [`begin`](Self::begin).
    pub fn begin_write_timeout(&self, timeout: Duration) -> Result<Transaction<'_, B>> {
        self.check_usable()?;
        let id = self.tracker.start_write(timeout).ok_or(Error::TransactionConflict)?;
        let snapshot = **self.committed.load();
        let staging = match TransactionalNodeTable::new_write(
            self.base(),
            snapshot.watermark,
            self.native.allocation_offset(),
        ) {
            Ok(staging) => staging,
            Err(e) => {
                self.tracker.end_write(id, false);
                return Err(e);
            },
        };
        tracing::debug!(%id, watermark = snapshot.watermark, "Begin write transaction");
        Ok(Transaction::new(self, id, TxnMode::Write, snapshot, staging))
    }

    fn begin_read(&self) -> Result<Transaction<'_, B>> {
        self.check_usable()?;
        let snapshot = **self.committed.load();
        let id = self.tracker.begin_read(snapshot.snapshot_id);
        let staging = TransactionalNodeTable::new_read(self.base(), snapshot.watermark);
        tracing::debug!(%id, watermark = snapshot.watermark, "Begin read transaction");
        Ok(Transaction::new(self, id, TxnMode::Read, snapshot, staging))
    }

    /// Returns store statistics.
    pub fn stats(&self) -> StoreStats {
        let committed = self.committed.load();
        StoreStats {
            transactions: self.tracker.stats(),
            cache: self.cached.stats(),
            watermark: committed.watermark,
            snapshot_id: committed.snapshot_id,
            poisoned: self.is_poisoned(),
        }
    }

    /// Closes the store. Later calls are no-ops.
    ///
    /// Transactions still open fail with `Error::Closed` afterwards. The
    /// journal is emptied once the base is synced, unless a failed commit
    /// poisoned the store.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the final sync fails.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // The cached stack and the direct handle each hold one reference;
        // the second release closes the native table.
        self.cached.close()?;
        self.direct.close()?;
        if self.is_poisoned() {
            self.journal.sync()?;
        } else {
            self.journal.truncate()?;
        }
        tracing::info!(location = ?self.location, "Store closed");
        Ok(())
    }

    fn base(&self) -> Arc<dyn NodeTable> {
        Arc::clone(&self.cached) as Arc<dyn NodeTable>
    }

    fn check_usable(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        if self.is_poisoned() {
            return Err(Error::Poisoned);
        }
        Ok(())
    }

    fn fault(&self, point: CommitPoint) -> Result<()> {
        match &*self.fault_injector.read() {
            Some(injector) if injector.should_fail(point) => {
                tracing::warn!(?point, "Injected commit fault");
                Err(Error::InjectedFault { point })
            },
            _ => Ok(()),
        }
    }

    /// Reserves the staged range of an aborted WRITE transaction.
    ///
    /// A failure poisons the store, since the range could otherwise be
    /// handed out again.
    fn reserve_aborted(&self, id: TxnId, staging: &TransactionalNodeTable) -> Result<()> {
        let Some(delta) = staging.delta() else {
            return Ok(());
        };
        // Nothing more is allocated in a closed or poisoned store.
        if self.check_usable().is_err() {
            return Ok(());
        }
        let end = delta.allocation_offset();
        if let Err(e) = self.native.pad_to(end) {
            self.poisoned.store(true, Ordering::Release);
            tracing::error!(%id, end, error = %e, "Failed to reserve aborted identifiers; store poisoned");
            return Err(e);
        }
        tracing::debug!(%id, end, "Reserved aborted identifiers");
        Ok(())
    }

    /// Journals and merges a WRITE transaction's staged terms.
    fn commit_staged(&self, id: TxnId, staging: &TransactionalNodeTable) -> Result<()> {
        self.check_usable()?;
        let Some(delta) = staging.delta() else {
            return Ok(());
        };
        let staged = delta.encoded_entries()?;
        if staged.is_empty() {
            tracing::debug!(%id, "Commit with nothing staged");
            return Ok(());
        }
        let records = delta.records();

        if let Err(e) = self.journal_and_merge(id, &staged, &records) {
            self.poisoned.store(true, Ordering::Release);
            tracing::error!(%id, error = %e, "Commit failed; store poisoned");
            return Err(e);
        }
        Ok(())
    }

    fn journal_and_merge(
        &self,
        id: TxnId,
        staged: &[(NodeId, Vec<u8>)],
        records: &[(TermHash, NodeId)],
    ) -> Result<()> {
        for (staged_id, encoded) in staged {
            self.journal.write(&recovery::object_entry(*staged_id, encoded))?;
        }
        self.journal.write(&recovery::block_entry(records))?;
        self.journal.write(&recovery::commit_entry(id))?;
        self.journal.sync()?;
        self.fault(CommitPoint::AfterJournalSync)?;

        for (n, (staged_id, encoded)) in staged.iter().enumerate() {
            let term: Term = codec::decode(encoded)?;
            recovery::merge_term(self.cached.as_ref(), &self.native, *staged_id, &term)?;
            if n == 0 {
                self.fault(CommitPoint::DuringMerge)?;
            }
        }

        if self.config.sync_on_commit {
            self.cached.sync()?;
        }
        self.fault(CommitPoint::BeforeJournalTruncate)?;
        if self.config.sync_on_commit {
            self.journal.truncate()?;
        } else {
            // The base may not be durable yet; the group stays for replay.
            tracing::debug!(%id, position = self.journal.position(), "Keeping journal group");
        }

        let previous = **self.committed.load();
        let next = CommittedState {
            watermark: self.native.allocation_offset(),
            snapshot_id: previous.snapshot_id.next(),
        };
        self.committed.store(Arc::new(next));
        tracing::debug!(
            %id,
            terms = staged.len(),
            watermark = next.watermark,
            snapshot = next.snapshot_id.raw(),
            "Committed write transaction"
        );
        Ok(())
    }
}

impl<B: StorageBackend + 'static> Drop for Store<B> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "Failed to close store on drop");
        }
    }
}

/// A transaction against a [`Store`].
///
/// Lookups see the committed state captured at begin plus, for WRITE
/// transactions, the terms the transaction itself allocated.
///
/// # Lifecycle
///
/// - `commit` and `abort` move an active transaction to `Committed` or `Aborted`; repeating either
///   is a no-op, and `commit` after `abort` fails with [`Error::TransactionAborted`]
/// - `end` releases the transaction, aborting an unfinished WRITE first; `end` after `end` is a
///   no-op
/// - dropping a transaction ends it
pub struct Transaction<'s, B: StorageBackend + 'static> {
    store: &'s Store<B>,
    id: TxnId,
    mode: TxnMode,
    state: TxnState,
    snapshot: CommittedState,
    staging: Arc<TransactionalNodeTable>,
    view: InlineNodeTable,
}

impl<'s, B: StorageBackend + 'static> Transaction<'s, B> {
    fn new(
        store: &'s Store<B>,
        id: TxnId,
        mode: TxnMode,
        snapshot: CommittedState,
        staging: TransactionalNodeTable,
    ) -> Self {
        let staging = Arc::new(staging);
        let view = InlineNodeTable::new(Arc::clone(&staging) as Arc<dyn NodeTable>);
        Self { store, id, mode, state: TxnState::Active, snapshot, staging, view }
    }

    /// Returns the transaction's sequence number.
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Returns the transaction's mode.
    pub fn mode(&self) -> TxnMode {
        self.mode
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> TxnState {
        self.state
    }

    /// Returns the base allocation offset this transaction reads at.
    pub fn watermark(&self) -> u64 {
        self.snapshot.watermark
    }

    /// Returns true if this transaction may allocate.
    ///
    /// READ transactions cannot be promoted.
    pub fn promote(&self) -> bool {
        self.mode == TxnMode::Write
    }

    fn check_active(&self) -> Result<()> {
        match self.state {
            TxnState::Active => Ok(()),
            TxnState::Aborted => Err(Error::TransactionAborted),
            TxnState::Committed | TxnState::Ended => Err(Error::Closed),
        }
    }

    /// Returns the identifier for `term`, allocating one if needed.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnsupportedOperation` in a READ transaction for a term
    /// that needs a stored identifier, and `Error::Closed` or
    /// `Error::TransactionAborted` once the transaction is finished.
    pub fn get_or_allocate(&self, term: &Term) -> Result<NodeId> {
        self.check_active()?;
        self.view.get_or_allocate(term)
    }

    /// Returns the identifier for `term`, or [`NodeId::DOES_NOT_EXIST`].
    ///
    /// # Errors
    ///
    /// Returns `Error::Closed` or `Error::TransactionAborted` once the
    /// transaction is finished, and codec errors for unencodable terms.
    pub fn lookup_id(&self, term: &Term) -> Result<NodeId> {
        self.check_active()?;
        self.view.lookup_id(term)
    }

    /// Returns the term for `id`, if it is visible to this transaction.
    ///
    /// # Errors
    ///
    /// As for [`lookup_id`](Self::lookup_id), plus storage errors.
    pub fn lookup_term(&self, id: NodeId) -> Result<Option<Term>> {
        self.check_active()?;
        self.view.lookup_term(id)
    }

    /// Returns true if `term` has a visible identifier.
    ///
    /// # Errors
    ///
    /// As for [`lookup_id`](Self::lookup_id).
    pub fn contains_term(&self, term: &Term) -> Result<bool> {
        self.check_active()?;
        self.view.contains_term(term)
    }

    /// Returns true if `id` maps to a visible term.
    ///
    /// # Errors
    ///
    /// As for [`lookup_term`](Self::lookup_term).
    pub fn contains_id(&self, id: NodeId) -> Result<bool> {
        self.check_active()?;
        self.view.contains_id(id)
    }

    /// Returns true if no stored term is visible.
    ///
    /// # Errors
    ///
    /// As for [`lookup_id`](Self::lookup_id).
    pub fn is_empty(&self) -> Result<bool> {
        self.check_active()?;
        self.view.is_empty()
    }

    /// Iterates over visible stored terms in allocation order.
    ///
    /// # Errors
    ///
    /// As for [`lookup_id`](Self::lookup_id).
    pub fn all(&self) -> Result<NodeIter<'_>> {
        self.check_active()?;
        self.view.all()
    }

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// Returns `Error::TransactionAborted` after [`abort`](Self::abort),
    /// `Error::Closed` after [`end`](Self::end), and any journal, merge, or
    /// injected error. A failed commit aborts the transaction.
    pub fn commit(&mut self) -> Result<()> {
        match self.state {
            TxnState::Active => {},
            TxnState::Committed => return Ok(()),
            TxnState::Aborted => return Err(Error::TransactionAborted),
            TxnState::Ended => return Err(Error::Closed),
        }
        if self.mode == TxnMode::Read {
            self.state = TxnState::Committed;
            return Ok(());
        }
        let result = self.store.commit_staged(self.id, &self.staging);
        let committed = result.is_ok();
        self.state = if committed { TxnState::Committed } else { TxnState::Aborted };
        self.store.tracker.end_write(self.id, committed);
        self.staging.close()?;
        result
    }

    /// Aborts the transaction, discarding staged terms.
    ///
    /// A no-op unless the transaction is active.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the staged range cannot be reserved, which
    /// also poisons the store.
    pub fn abort(&mut self) -> Result<()> {
        if self.state != TxnState::Active {
            return Ok(());
        }
        self.state = TxnState::Aborted;
        if self.mode == TxnMode::Write {
            // Reserve before releasing the writer slot.
            let reserved = self.store.reserve_aborted(self.id, &self.staging);
            self.store.tracker.end_write(self.id, false);
            tracing::debug!(id = %self.id, "Aborted write transaction");
            if let Err(e) = reserved {
                self.staging.close()?;
                return Err(e);
            }
        }
        self.staging.close()
    }

    /// Ends the transaction, aborting it first if it is an unfinished WRITE.
    ///
    /// # Errors
    ///
    /// As for [`abort`](Self::abort).
    pub fn end(&mut self) -> Result<()> {
        match self.state {
            TxnState::Ended => return Ok(()),
            TxnState::Active if self.mode == TxnMode::Write => self.abort()?,
            _ => {},
        }
        if self.mode == TxnMode::Read {
            self.store.tracker.end_read(self.snapshot.snapshot_id);
        }
        self.state = TxnState::Ended;
        self.staging.close()
    }
}

impl<B: StorageBackend + 'static> Drop for Transaction<'_, B> {
    fn drop(&mut self) {
        if self.state == TxnState::Ended {
            return;
        }
        if self.state == TxnState::Active {
            tracing::warn!(id = %self.id, mode = ?self.mode, "Transaction dropped while active");
        }
        if let Err(e) = self.end() {
            tracing::warn!(id = %self.id, error = %e, "Failed to end transaction on drop");
        }
    }
}
