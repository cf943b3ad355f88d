//! Crash recovery tests for the append-only files.
//!
//! A crash can leave any prefix of the last write on disk. Each test:
//!
//! 1. Writes a few complete entries to a file-backed structure
//! 2. Appends one more entry
//! 3. Cuts the file at every byte inside that last entry
//! 4. Reopens and checks that exactly the complete entries survive
//!
//! # Tail States
//!
//! ```text
//! ┌─────────┬─────────┬──────────────┐
//! │ entry 1 │ entry 2 │ entry 3 ...  │
//! └─────────┴─────────┴──────┬───────┘
//!                            └── cut here: entry 3 is dropped, file truncated
//! ```
//!
//! Damage before the tail is not a crash artefact and must be reported.

// Test code is allowed to use unwrap for simplicity
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    fs::OpenOptions,
    path::{Path, PathBuf},
};

use tempfile::TempDir;
use tripledb_store::{
    Error, FileBackend, Journal, JournalEntry, JournalEntryKind, ObjectLog, RangeIndex,
};
use tripledb_types::{Term, TermHash, term_hash};

/// Helper: cut the file at `path` to `len` bytes.
fn cut_file(path: &Path, len: u64) {
    let file = OpenOptions::new().write(true).open(path).unwrap();
    file.set_len(len).unwrap();
    file.sync_all().unwrap();
}

/// Helper: flip one byte of the file at `path`.
fn flip_byte(path: &Path, at: usize) {
    let mut bytes = std::fs::read(path).unwrap();
    bytes[at] ^= 0xFF;
    std::fs::write(path, bytes).unwrap();
}

fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).unwrap().len()
}

fn key(n: u32) -> TermHash {
    term_hash(&Term::uri(format!("http://example.org/{n}"))).unwrap()
}

// ============================================================================
// Object log
// ============================================================================

/// Helper: write `count` entries, then one more; returns the file path and
/// the file length before the last entry.
fn object_log_with_tail(dir: &Path, count: u32) -> (PathBuf, u64) {
    let path = dir.join("nodes.dat");
    let log = ObjectLog::open(FileBackend::create(&path).unwrap()).unwrap();
    for n in 0..count {
        log.append(format!("entry {n}").as_bytes()).unwrap();
    }
    let complete = log.next_offset();
    log.append(b"the entry a crash interrupts").unwrap();
    log.sync().unwrap();
    (path, complete)
}

#[test]
fn test_object_log_every_cut_recovers() {
    let dir = TempDir::new().unwrap();
    let (path, complete) = object_log_with_tail(dir.path(), 3);
    let full = std::fs::read(&path).unwrap();

    for cut in complete..full.len() as u64 {
        std::fs::write(&path, &full).unwrap();
        cut_file(&path, cut);

        let log = ObjectLog::open(FileBackend::open(&path).unwrap()).unwrap();
        assert_eq!(log.next_offset(), complete, "cut at {cut}");
        let entries: Vec<Vec<u8>> = log.iter().map(|e| e.unwrap().1).collect();
        assert_eq!(entries.len(), 3, "cut at {cut}");
        assert_eq!(file_len(&path), complete);
    }
}

#[test]
fn test_object_log_damage_before_tail_is_reported() {
    let dir = TempDir::new().unwrap();
    let (path, _) = object_log_with_tail(dir.path(), 3);
    // Inside the first entry's bytes.
    flip_byte(&path, 5);
    let err = ObjectLog::open(FileBackend::open(&path).unwrap()).unwrap_err();
    assert!(matches!(err, Error::ChecksumMismatch { offset: 0 }), "got {err}");
}

// ============================================================================
// Range index
// ============================================================================

#[test]
fn test_range_index_every_cut_recovers() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nodes.idn");
    {
        let index = RangeIndex::open(FileBackend::create(&path).unwrap()).unwrap();
        for n in 0..4 {
            index.insert(key(n), u64::from(n) * 10).unwrap();
        }
        index.sync().unwrap();
    }
    let full = std::fs::read(&path).unwrap();
    let record = full.len() / 4;
    let complete = (record * 3) as u64;

    for cut in complete..full.len() as u64 {
        std::fs::write(&path, &full).unwrap();
        cut_file(&path, cut);

        let index = RangeIndex::open(FileBackend::open(&path).unwrap()).unwrap();
        assert_eq!(index.len(), 3, "cut at {cut}");
        assert_eq!(index.find(&key(2)), Some(20));
        assert_eq!(index.find(&key(3)), None);
        assert_eq!(file_len(&path), complete);
    }
}

#[test]
fn test_range_index_reinsert_after_recovery() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nodes.idn");
    {
        let index = RangeIndex::open(FileBackend::create(&path).unwrap()).unwrap();
        index.insert(key(1), 1).unwrap();
        index.insert(key(2), 2).unwrap();
        index.sync().unwrap();
    }
    cut_file(&path, file_len(&path) - 1);

    let index = RangeIndex::open(FileBackend::open(&path).unwrap()).unwrap();
    assert!(index.insert(key(2), 2).unwrap());
    assert!(!index.insert(key(2), 2).unwrap());
    index.sync().unwrap();
    drop(index);

    let index = RangeIndex::open(FileBackend::open(&path).unwrap()).unwrap();
    assert_eq!(index.len(), 2);
}

// ============================================================================
// Journal
// ============================================================================

#[test]
fn test_journal_every_cut_recovers() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("journal.jrnl");
    let complete = {
        let journal = Journal::open(FileBackend::create(&path).unwrap()).unwrap();
        journal.write(&JournalEntry::new(JournalEntryKind::Object, b"object".to_vec())).unwrap();
        journal.write(&JournalEntry::new(JournalEntryKind::Block, vec![7; 24])).unwrap();
        let complete = journal.position();
        journal.write(&JournalEntry::new(JournalEntryKind::Commit, 9u64.to_le_bytes().to_vec()))
            .unwrap();
        journal.sync().unwrap();
        complete
    };
    let full = std::fs::read(&path).unwrap();

    for cut in complete..full.len() as u64 {
        std::fs::write(&path, &full).unwrap();
        cut_file(&path, cut);

        let journal = Journal::open(FileBackend::open(&path).unwrap()).unwrap();
        let kinds: Vec<JournalEntryKind> =
            journal.entries().unwrap().into_iter().map(|(_, e)| e.kind).collect();
        assert_eq!(kinds, vec![JournalEntryKind::Object, JournalEntryKind::Block], "cut at {cut}");
        assert_eq!(journal.position(), complete);
    }
}

#[test]
fn test_journal_truncate_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("journal.jrnl");
    {
        let journal = Journal::open(FileBackend::create(&path).unwrap()).unwrap();
        journal.write(&JournalEntry::new(JournalEntryKind::Object, b"x".to_vec())).unwrap();
        journal.sync().unwrap();
        journal.truncate().unwrap();
    }
    let journal = Journal::open(FileBackend::open(&path).unwrap()).unwrap();
    assert!(journal.is_empty());
    assert!(journal.entries().unwrap().is_empty());
}
