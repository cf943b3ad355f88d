//! Transaction identifiers, committed snapshots, and admission tracking.
//!
//! - [`TxnId`]: increasing sequence number assigned at begin
//! - [`CommittedState`]: the published base state readers snapshot
//! - [`TransactionTracker`]: live reader counts per snapshot and the single
//!   writer slot

use std::{
    collections::BTreeMap,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};

/// Transaction sequence number.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub struct TxnId(u64);

impl TxnId {
    /// Create a transaction ID from its raw value.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw u64 value.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}

/// Whether a transaction may allocate.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum TxnMode {
    /// Lookups only.
    Read,
    /// Lookups and allocation.
    Write,
}

/// Lifecycle state of a transaction.
///
/// `Active` moves to `Committed` or `Aborted`, and every state ends in `Ended`.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum TxnState {
    /// Open for operations.
    Active,
    /// Staged terms were merged and published.
    Committed,
    /// Staged terms were discarded.
    Aborted,
    /// Released; no further operations are accepted.
    Ended,
}

/// Identifier of a committed base state.
///
/// Each successful commit increments the snapshot ID.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Default)]
pub struct SnapshotId(pub u64);

impl SnapshotId {
    /// Get the raw u64 value.
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Increment and return the next snapshot ID.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

/// The committed state that transactions snapshot.
///
/// Swapped atomically after each successful commit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommittedState {
    /// Base allocation offset; pointer identifiers below it are committed.
    pub watermark: u64,
    /// The snapshot ID for this committed state.
    pub snapshot_id: SnapshotId,
}

/// Transaction counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransactionStats {
    /// Read transactions currently active.
    pub active_readers: usize,
    /// Write transactions currently active (zero or one).
    pub active_writers: usize,
    /// Write transactions that committed.
    pub committed_writers: u64,
    /// Write transactions that aborted, explicitly or by ending early.
    pub aborted_writers: u64,
    /// Read transactions that ended.
    pub finished_readers: u64,
    /// Oldest snapshot still held by an active reader.
    pub oldest_live_reader: Option<SnapshotId>,
}

struct TrackerState {
    /// Reference count of read transactions per snapshot ID.
    live_readers: BTreeMap<SnapshotId, u64>,
    /// Current write transaction (at most one).
    writer: Option<TxnId>,
    committed_writers: u64,
    aborted_writers: u64,
    finished_readers: u64,
}

/// Tracks live transactions and admits one writer at a time.
///
/// # Example
///
/// ```text
/// Time    Action                          live_readers    writer
/// ----    ------                          ------------    ------
/// T1      Read starts (snapshot 0)        {0: 1}          -
/// T2      Write starts                    {0: 1}          txn-2
/// T3      Second write                    {0: 1}          txn-2   (rejected)
/// T4      Write commits (snapshot 1)      {0: 1}          -
/// T5      Read starts (snapshot 1)        {0: 1, 1: 1}    -
/// T6      First read ends                 {1: 1}          -
/// ```
pub struct TransactionTracker {
    state: Mutex<TrackerState>,
    writer_released: Condvar,
    next_txn_id: AtomicU64,
}

impl TransactionTracker {
    /// Create a new transaction tracker.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState {
                live_readers: BTreeMap::new(),
                writer: None,
                committed_writers: 0,
                aborted_writers: 0,
                finished_readers: 0,
            }),
            writer_released: Condvar::new(),
            next_txn_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> TxnId {
        TxnId(self.next_txn_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Register a read transaction at the given snapshot.
    pub fn begin_read(&self, snapshot_id: SnapshotId) -> TxnId {
        let id = self.next_id();
        let mut state = self.state.lock();
        *state.live_readers.entry(snapshot_id).or_insert(0) += 1;
        id
    }

    /// Unregister a read transaction.
    pub fn end_read(&self, snapshot_id: SnapshotId) {
        let mut state = self.state.lock();
        if let Some(count) = state.live_readers.get_mut(&snapshot_id) {
            *count -= 1;
            if *count == 0 {
                state.live_readers.remove(&snapshot_id);
            }
            state.finished_readers += 1;
        }
    }

    /// Claim the writer slot, waiting up to `timeout` for it to free up.
    ///
    /// Returns `None` if another writer still holds the slot. A zero
    /// timeout fails immediately.
    pub fn start_write(&self, timeout: Duration) -> Option<TxnId> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.writer.is_some() {
            if timeout.is_zero() {
                return None;
            }
            if self.writer_released.wait_until(&mut state, deadline).timed_out() {
                if state.writer.is_some() {
                    return None;
                }
                break;
            }
        }
        let id = self.next_id();
        state.writer = Some(id);
        Some(id)
    }

    /// Release the writer slot.
    pub fn end_write(&self, id: TxnId, committed: bool) {
        let mut state = self.state.lock();
        if state.writer != Some(id) {
            tracing::error!(%id, current = ?state.writer, "Ending a write transaction that does not hold the slot");
            return;
        }
        state.writer = None;
        if committed {
            state.committed_writers += 1;
        } else {
            state.aborted_writers += 1;
        }
        drop(state);
        self.writer_released.notify_one();
    }

    /// Returns current counters.
    pub fn stats(&self) -> TransactionStats {
        let state = self.state.lock();
        TransactionStats {
            active_readers: state.live_readers.values().sum::<u64>() as usize,
            active_writers: usize::from(state.writer.is_some()),
            committed_writers: state.committed_writers,
            aborted_writers: state.aborted_writers,
            finished_readers: state.finished_readers,
            oldest_live_reader: state.live_readers.keys().next().copied(),
        }
    }
}

impl Default for TransactionTracker {
    fn default() -> Self {
        Self::new()
    }
}
