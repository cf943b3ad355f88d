//! Commit-path fault injection.
//!
//! A [`FaultInjector`] installed on a [`Store`](crate::Store) is consulted at
//! each [`CommitPoint`]. When it reports a fault, the commit stops there with
//! [`Error::InjectedFault`](crate::Error::InjectedFault), leaving the files in
//! exactly the state a process crash at that point would. The store is then
//! poisoned and must be reopened, which replays the journal.
//!
//! ```text
//! journal Object… Block Commit → sync → merge term 1 → … → merge term n → sync base → truncate journal
//!                                   ↑            ↑                                 ↑
//!                         AfterJournalSync  DuringMerge                BeforeJournalTruncate
//! ```

/// Points in the commit sequence where a fault can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommitPoint {
    /// After the journal group is durable, before any base table write.
    AfterJournalSync,
    /// After the first staged term has been merged into the base table.
    DuringMerge,
    /// After the merge and base sync, before the journal is cleared.
    BeforeJournalTruncate,
}

impl CommitPoint {
    /// Every commit point, in commit order.
    pub const ALL: [CommitPoint; 3] =
        [Self::AfterJournalSync, Self::DuringMerge, Self::BeforeJournalTruncate];
}

/// Decides whether a commit fails at a given point.
pub trait FaultInjector: Send + Sync {
    /// Returns true if the commit must stop at `point`.
    fn should_fail(&self, point: CommitPoint) -> bool;
}
