//! Crash recovery tests for the journaled commit.
//!
//! Each test commits some initial terms, arms a [`CrashInjector`] at one
//! commit point, attempts a second commit that "crashes" there, drops the
//! poisoned store, and reopens the same files. Recovery must leave every
//! term of the crashed commit present under the identifier it was staged
//! with, because the journal group was durable before the first fault point.
//!
//! # Crash Points
//!
//! ```text
//! commit():
//!   1. Journal Object… Block Commit
//!   2. SYNC journal                      ← CommitPoint::AfterJournalSync
//!   3. Merge first staged term           ← CommitPoint::DuringMerge
//!   4. Merge remaining terms
//!   5. SYNC base
//!   6. Truncate journal                  ← CommitPoint::BeforeJournalTruncate
//! ```

// Test code is allowed to use unwrap for simplicity
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{path::Path, sync::Arc};

use tripledb_dict::{CommitPoint, Error, Store, TxnMode};
use tripledb_store::{InMemoryBackend, StorageBackend};
use tripledb_test_utils::{CrashInjector, TestDir};
use tripledb_types::{NodeId, StoreConfig, Term};

fn term(n: u32) -> Term {
    Term::uri(format!("http://example.org/crash/{n}"))
}

/// Commits `terms` and returns their identifiers.
fn commit_terms<B: StorageBackend + 'static>(store: &Store<B>, terms: &[Term]) -> Vec<NodeId> {
    let mut txn = store.begin(TxnMode::Write).unwrap();
    let ids = terms.iter().map(|t| txn.get_or_allocate(t).unwrap()).collect();
    txn.commit().unwrap();
    ids
}

/// Stages `terms`, commits with a crash at `point`, and returns the staged identifiers.
fn crash_commit<B: StorageBackend + 'static>(
    store: &Store<B>,
    terms: &[Term],
    point: CommitPoint,
) -> Vec<NodeId> {
    let injector = CrashInjector::new(point);
    store.set_fault_injector(injector.clone());
    injector.arm();

    let mut txn = store.begin(TxnMode::Write).unwrap();
    let staged: Vec<NodeId> = terms.iter().map(|t| txn.get_or_allocate(t).unwrap()).collect();
    let err = txn.commit().unwrap_err();
    assert!(matches!(err, Error::InjectedFault { point: p } if p == point), "got {err}");
    assert!(injector.has_crashed());
    assert!(store.is_poisoned());
    staged
}

fn assert_visible<B: StorageBackend + 'static>(store: &Store<B>, terms: &[Term], ids: &[NodeId]) {
    let reader = store.begin(TxnMode::Read).unwrap();
    for (t, id) in terms.iter().zip(ids) {
        assert_eq!(reader.lookup_id(t).unwrap(), *id, "lookup_id({t})");
        assert_eq!(reader.lookup_term(*id).unwrap().as_ref(), Some(t), "lookup_term({id})");
    }
}

fn file_crash_then_recover(location: &Path, point: CommitPoint) {
    let before: Vec<Term> = (0..3).map(term).collect();
    let crashed: Vec<Term> = (10..14).map(term).collect();

    let (before_ids, staged) = {
        let store = Store::open(location).unwrap();
        let before_ids = commit_terms(&store, &before);
        let staged = crash_commit(&store, &crashed, point);
        (before_ids, staged)
    };

    let store = Store::open(location).unwrap();
    let report = store.recovery_report();
    assert_eq!(report.groups_replayed, 1);
    assert_eq!(report.terms_replayed, crashed.len());
    assert!(!store.is_poisoned());
    assert_visible(&store, &before, &before_ids);
    assert_visible(&store, &crashed, &staged);

    // The recovered store accepts new commits that continue the numbering.
    let next = commit_terms(&store, &[term(99)]);
    assert!(next[0] > *staged.iter().max().unwrap());
}

// ============================================================================
// File-backed stores
// ============================================================================

#[test]
fn test_recover_after_journal_sync() {
    let dir = TestDir::new();
    file_crash_then_recover(&dir.store_dir(), CommitPoint::AfterJournalSync);
}

#[test]
fn test_recover_during_merge() {
    let dir = TestDir::new();
    file_crash_then_recover(&dir.store_dir(), CommitPoint::DuringMerge);
}

#[test]
fn test_recover_before_journal_truncate() {
    let dir = TestDir::new();
    file_crash_then_recover(&dir.store_dir(), CommitPoint::BeforeJournalTruncate);
}

#[test]
fn test_clean_reopen_replays_nothing() {
    let dir = TestDir::new();
    let location = dir.store_dir();
    let ids = {
        let store = Store::open(&location).unwrap();
        commit_terms(&store, &[term(1), term(2)])
    };
    let store = Store::open(&location).unwrap();
    assert!(!store.recovery_report().had_journal());
    assert_visible(&store, &[term(1), term(2)], &ids);
}

#[test]
fn test_torn_journal_tail_discards_uncommitted_group() {
    let dir = TestDir::new();
    let location = dir.store_dir();
    {
        let store = Store::open(&location).unwrap();
        commit_terms(&store, &[term(1)]);
        crash_commit(&store, &[term(2), term(3)], CommitPoint::AfterJournalSync);
    }
    // Tear the commit marker off the journal, as if the crash hit mid-write.
    let journal = location.join("journal.jrnl");
    let bytes = std::fs::read(&journal).unwrap();
    std::fs::write(&journal, &bytes[..bytes.len() - 5]).unwrap();

    let store = Store::open(&location).unwrap();
    let report = store.recovery_report();
    assert_eq!(report.groups_replayed, 0);
    assert!(report.entries_discarded > 0);

    let reader = store.begin(TxnMode::Read).unwrap();
    assert!(reader.contains_term(&term(1)).unwrap());
    assert!(!reader.contains_term(&term(2)).unwrap());
    assert!(!reader.contains_term(&term(3)).unwrap());
}

// ============================================================================
// In-memory stores shared across reopen
// ============================================================================

struct MemoryFiles {
    index: Arc<InMemoryBackend>,
    objects: Arc<InMemoryBackend>,
    journal: Arc<InMemoryBackend>,
}

impl MemoryFiles {
    fn new() -> Self {
        Self {
            index: Arc::new(InMemoryBackend::new()),
            objects: Arc::new(InMemoryBackend::new()),
            journal: Arc::new(InMemoryBackend::new()),
        }
    }

    /// Keeps only the journal, as if unsynced base writes were lost.
    fn journal_only(&self) -> Self {
        Self {
            index: Arc::new(InMemoryBackend::new()),
            objects: Arc::new(InMemoryBackend::new()),
            journal: Arc::new(InMemoryBackend::from_bytes(self.journal.to_bytes())),
        }
    }

    fn open(&self) -> Store<Arc<InMemoryBackend>> {
        self.open_with(StoreConfig::default())
    }

    fn open_with(&self, config: StoreConfig) -> Store<Arc<InMemoryBackend>> {
        Store::from_backends(
            Arc::clone(&self.index),
            Arc::clone(&self.objects),
            Arc::clone(&self.journal),
            config,
        )
        .unwrap()
    }
}

#[test]
fn test_every_commit_point_recovers_in_memory() {
    for point in CommitPoint::ALL {
        let files = MemoryFiles::new();
        let crashed: Vec<Term> = (0..5).map(term).collect();
        let staged = {
            let store = files.open();
            crash_commit(&store, &crashed, point)
        };
        assert!(!files.journal.is_empty(), "journal must survive a crash at {point:?}");

        let store = files.open();
        assert_visible(&store, &crashed, &staged);
        assert!(files.journal.is_empty(), "recovery truncates the journal");
    }
}

#[test]
fn test_replay_twice_is_idempotent() {
    let files = MemoryFiles::new();
    let crashed: Vec<Term> = (0..3).map(term).collect();
    let staged = {
        let store = files.open();
        crash_commit(&store, &crashed, CommitPoint::DuringMerge)
    };
    let journal_copy = files.journal.to_bytes();
    drop(files.open());

    // Put the journal back, as if the process crashed during recovery.
    files.journal.truncate(0).unwrap();
    files.journal.append(&journal_copy).unwrap();

    let store = files.open();
    assert_eq!(store.recovery_report().groups_replayed, 1);
    assert_visible(&store, &crashed, &staged);
    let reader = store.begin(TxnMode::Read).unwrap();
    assert_eq!(reader.all().unwrap().count(), crashed.len());
}

#[test]
fn test_unsynced_commits_replay_from_journal() {
    let config = StoreConfig::builder().sync_on_commit(false).build().unwrap();
    let files = MemoryFiles::new();
    let terms: Vec<Term> = (0..4).map(term).collect();

    let store = files.open_with(config.clone());
    let first = commit_terms(&store, &terms[..2]);
    let second = commit_terms(&store, &terms[2..]);
    assert!(!files.journal.is_empty(), "unsynced commits stay journaled");

    let recovered = files.journal_only().open_with(config);
    let report = recovered.recovery_report();
    assert_eq!(report.groups_replayed, 2);
    assert_eq!(report.terms_replayed, terms.len());
    assert_visible(&recovered, &terms[..2], &first);
    assert_visible(&recovered, &terms[2..], &second);

    store.close().unwrap();
    assert!(files.journal.is_empty(), "close empties the journal once the base is synced");
}
