//! Journal payloads and replay.
//!
//! A committed write transaction is journaled as one group:
//!
//! ```text
//! Object [id u64 LE][encoded term]   one per staged term, in allocation order
//! Block  ([key 16][id u64 LE])*      the staging delta's index records
//! Commit [txn id u64 LE]             closes the group
//! ```
//!
//! Replay re-allocates every staged term of each complete group through the
//! base table. Allocation is idempotent, so a group that was partly or fully
//! merged before the crash replays to the same state. The identifiers the
//! base assigns must match the journaled ones.
//!
//! A staged identifier can lie past the end of the base when an aborted
//! transaction reserved offsets that were not yet durable. The base is
//! padded up to the staged identifier before the term is allocated.

use byteorder::{ByteOrder, LittleEndian};
use tripledb_store::{Journal, JournalEntry, JournalEntryKind, StorageBackend};
use tripledb_types::{NodeId, TERM_HASH_LEN, Term, TermHash, codec};

use crate::{
    error::{Error, Result},
    native::NativeNodeTable,
    table::NodeTable,
    transaction::TxnId,
};

const ID_SIZE: usize = 8;
const RECORD_SIZE: usize = TERM_HASH_LEN + ID_SIZE;

/// Outcome of replaying the journal at open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Complete transaction groups replayed into the base table.
    pub groups_replayed: usize,
    /// Staged terms replayed, including ones already present.
    pub terms_replayed: usize,
    /// Journal entries after the last commit marker that were discarded.
    pub entries_discarded: usize,
}

impl RecoveryReport {
    /// Returns true if the journal held anything at open.
    pub fn had_journal(&self) -> bool {
        self.groups_replayed > 0 || self.entries_discarded > 0
    }
}

pub(crate) fn object_entry(id: NodeId, encoded: &[u8]) -> JournalEntry {
    let mut payload = vec![0u8; ID_SIZE + encoded.len()];
    LittleEndian::write_u64(&mut payload[..ID_SIZE], id.raw());
    payload[ID_SIZE..].copy_from_slice(encoded);
    JournalEntry::new(JournalEntryKind::Object, payload)
}

pub(crate) fn block_entry(records: &[(TermHash, NodeId)]) -> JournalEntry {
    let mut payload = Vec::with_capacity(records.len() * RECORD_SIZE);
    for (key, id) in records {
        payload.extend_from_slice(key.as_bytes());
        payload.extend_from_slice(&id.raw().to_le_bytes());
    }
    JournalEntry::new(JournalEntryKind::Block, payload)
}

pub(crate) fn commit_entry(txn: TxnId) -> JournalEntry {
    JournalEntry::new(JournalEntryKind::Commit, txn.raw().to_le_bytes().to_vec())
}

fn parse_object(payload: &[u8]) -> Result<(NodeId, &[u8])> {
    if payload.len() < ID_SIZE {
        return Err(Error::InternalConsistency {
            reason: format!("journal object entry of {} bytes lacks an identifier", payload.len()),
        });
    }
    let (id, encoded) = payload.split_at(ID_SIZE);
    Ok((NodeId::from_raw(LittleEndian::read_u64(id)), encoded))
}

fn parse_block(payload: &[u8]) -> Result<Vec<(TermHash, NodeId)>> {
    if payload.len() % RECORD_SIZE != 0 {
        return Err(Error::InternalConsistency {
            reason: format!("journal block entry of {} bytes is not whole records", payload.len()),
        });
    }
    Ok(payload
        .chunks_exact(RECORD_SIZE)
        .map(|record| {
            let mut key = [0u8; TERM_HASH_LEN];
            key.copy_from_slice(&record[..TERM_HASH_LEN]);
            let id = LittleEndian::read_u64(&record[TERM_HASH_LEN..]);
            (TermHash::from_bytes(key), NodeId::from_raw(id))
        })
        .collect())
}

/// Entries of one transaction group collected so far.
#[derive(Default)]
struct Group<'a> {
    objects: Vec<(NodeId, &'a [u8])>,
    records: Vec<(TermHash, NodeId)>,
    entries: usize,
}

/// Replays every complete group in `journal` into `base`.
///
/// `native` is the table underneath `base`; it is used to check journaled
/// index records against the records the replay produced. The journal is
/// not truncated here.
pub(crate) fn replay<B: StorageBackend>(
    journal: &Journal<B>,
    base: &dyn NodeTable,
    native: &NativeNodeTable<B>,
) -> Result<RecoveryReport> {
    let entries = journal.entries()?;
    let mut report = RecoveryReport::default();
    let mut group = Group::default();

    for (position, entry) in &entries {
        group.entries += 1;
        match entry.kind {
            JournalEntryKind::Object => group.objects.push(parse_object(&entry.payload)?),
            JournalEntryKind::Block => group.records.extend(parse_block(&entry.payload)?),
            JournalEntryKind::Commit => {
                let group = std::mem::take(&mut group);
                apply_group(&group, base, native)?;
                tracing::debug!(
                    position,
                    terms = group.objects.len(),
                    "Replayed journal group"
                );
                report.groups_replayed += 1;
                report.terms_replayed += group.objects.len();
            },
        }
    }

    if group.entries > 0 {
        tracing::warn!(
            entries = group.entries,
            "Discarding journal entries without a commit marker"
        );
        report.entries_discarded = group.entries;
    }
    Ok(report)
}

/// Allocates `term` in `base` and checks it receives `staged`.
///
/// `native` is the table underneath `base`. It is padded first when
/// `staged` lies past its end.
pub(crate) fn merge_term<B: StorageBackend>(
    base: &dyn NodeTable,
    native: &NativeNodeTable<B>,
    staged: NodeId,
    term: &Term,
) -> Result<()> {
    if let Some(offset) = staged.offset() {
        native.pad_to(offset)?;
    }
    let id = base.get_or_allocate(term)?;
    if id != staged {
        tracing::error!(%term, %staged, %id, "Merge assigned a different identifier");
        return Err(Error::InternalConsistency {
            reason: format!("merge of {term} assigned {id}, staged as {staged}"),
        });
    }
    Ok(())
}

fn apply_group<B: StorageBackend>(
    group: &Group<'_>,
    base: &dyn NodeTable,
    native: &NativeNodeTable<B>,
) -> Result<()> {
    for (staged, encoded) in &group.objects {
        merge_term(base, native, *staged, &codec::decode(encoded)?)?;
    }
    if group.records.len() != group.objects.len() {
        return Err(Error::InternalConsistency {
            reason: format!(
                "journal group holds {} objects but {} index records",
                group.objects.len(),
                group.records.len()
            ),
        });
    }
    for (key, id) in &group.records {
        if native.find_record(key) != Some(*id) {
            tracing::error!(?key, %id, "Journaled index record missing after replay");
            return Err(Error::InternalConsistency {
                reason: format!("index record {key:?} → {id} missing after replay"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Arc;

    use tripledb_store::InMemoryBackend;
    use tripledb_types::term_hash;

    use super::*;

    /// Journals `terms` as one group, staged from `base_offset`.
    fn journal_group(journal: &Journal<InMemoryBackend>, base_offset: u64, terms: &[Term]) {
        let delta = NativeNodeTable::with_base_offset(
            InMemoryBackend::new(),
            InMemoryBackend::new(),
            base_offset,
        )
        .unwrap();
        for t in terms {
            delta.get_or_allocate(t).unwrap();
        }
        for (id, encoded) in delta.encoded_entries().unwrap() {
            journal.write(&object_entry(id, &encoded)).unwrap();
        }
        journal.write(&block_entry(&delta.records())).unwrap();
        journal.write(&commit_entry(TxnId::from_raw(7))).unwrap();
    }

    #[test]
    fn test_replay_complete_group() {
        let journal = Journal::open(InMemoryBackend::new()).unwrap();
        let terms = [Term::uri("http://example.org/a"), Term::plain("b")];
        journal_group(&journal, 0, &terms);

        let native = Arc::new(NativeNodeTable::in_memory().unwrap());
        let report = replay(&journal, native.as_ref(), &native).unwrap();
        assert_eq!(report.groups_replayed, 1);
        assert_eq!(report.terms_replayed, 2);
        assert!(report.had_journal());
        for t in &terms {
            assert!(native.contains_term(t).unwrap());
        }
    }

    #[test]
    fn test_replay_is_idempotent() {
        let journal = Journal::open(InMemoryBackend::new()).unwrap();
        journal_group(&journal, 0, &[Term::plain("x"), Term::plain("y")]);
        let native = NativeNodeTable::in_memory().unwrap();
        // First term already merged before the crash.
        native.get_or_allocate(&Term::plain("x")).unwrap();

        replay(&journal, &native, &native).unwrap();
        replay(&journal, &native, &native).unwrap();
        assert_eq!(native.len(), 2);
    }

    #[test]
    fn test_trailing_group_without_commit_is_discarded() {
        let journal = Journal::open(InMemoryBackend::new()).unwrap();
        let encoded = codec::encode_to_vec(&Term::plain("lost")).unwrap();
        journal.write(&object_entry(NodeId::from_offset(0).unwrap(), &encoded)).unwrap();

        let native = NativeNodeTable::in_memory().unwrap();
        let report = replay(&journal, &native, &native).unwrap();
        assert_eq!(report.groups_replayed, 0);
        assert_eq!(report.entries_discarded, 1);
        assert!(native.is_empty().unwrap());
    }

    #[test]
    fn test_mismatched_identifier_is_inconsistent() {
        let journal = Journal::open(InMemoryBackend::new()).unwrap();
        journal_group(&journal, 0, &[Term::plain("z")]);
        // Offset 0 already holds a different term.
        let native = NativeNodeTable::in_memory().unwrap();
        native.get_or_allocate(&Term::plain("other")).unwrap();
        assert!(matches!(
            replay(&journal, &native, &native),
            Err(Error::InternalConsistency { .. })
        ));
    }

    #[test]
    fn test_replay_pads_to_staged_identifier() {
        let journal = Journal::open(InMemoryBackend::new()).unwrap();
        // Staged after 100 bytes reserved by an aborted transaction.
        journal_group(&journal, 100, &[Term::plain("z")]);
        let native = NativeNodeTable::in_memory().unwrap();

        replay(&journal, &native, &native).unwrap();
        let id = native.lookup_id(&Term::plain("z")).unwrap();
        assert_eq!(id.offset(), Some(100));
        assert_eq!(native.lookup_term(NodeId::from_offset(0).unwrap()).unwrap(), None);

        replay(&journal, &native, &native).unwrap();
        assert_eq!(native.len(), 1);
        assert_eq!(native.lookup_id(&Term::plain("z")).unwrap(), id);
    }

    #[test]
    fn test_block_payload_layout() {
        let key = term_hash(&Term::plain("k")).unwrap();
        let id = NodeId::from_offset(42).unwrap();
        let entry = block_entry(&[(key, id)]);
        assert_eq!(entry.payload.len(), RECORD_SIZE);
        assert_eq!(parse_block(&entry.payload).unwrap(), vec![(key, id)]);
        assert!(parse_block(&entry.payload[1..]).is_err());
    }

    #[test]
    fn test_short_object_payload_is_rejected() {
        assert!(parse_object(&[1, 2, 3]).is_err());
    }
}
