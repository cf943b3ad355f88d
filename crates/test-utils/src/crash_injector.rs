//! Crash injection utilities for testing journal recovery.
//!
//! Provides a [`CrashInjector`] that stops a commit at a configured
//! [`CommitPoint`]. Installed on a store, it makes the commit return
//! `Error::InjectedFault` with the files left exactly as a process crash at
//! that point would leave them. Reopening the store then exercises recovery.
//!
//! # Crash Points
//!
//! ```text
//! journal group → sync → merge term 1 → … → merge term n → sync base → truncate journal
//!                     ↑               ↑                               ↑
//!          AfterJournalSync      DuringMerge              BeforeJournalTruncate
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

use tripledb_dict::{CommitPoint, FaultInjector};

/// Tracks crash injection state for deterministic crash simulation.
///
/// # Thread Safety
///
/// All state is atomic, making `CrashInjector` safe to share across threads.
#[derive(Debug)]
pub struct CrashInjector {
    /// The commit point to stop at.
    crash_point: CommitPoint,
    /// Number of commit points observed while armed.
    observed: AtomicU32,
    /// Whether the crash has been triggered.
    crashed: AtomicBool,
    /// Whether injection is armed (enabled).
    armed: AtomicBool,
}

impl CrashInjector {
    /// Creates a new crash injector targeting the specified commit point.
    pub fn new(crash_point: CommitPoint) -> Arc<Self> {
        Arc::new(Self {
            crash_point,
            observed: AtomicU32::new(0),
            crashed: AtomicBool::new(false),
            armed: AtomicBool::new(false),
        })
    }

    /// Arms the injector so it will trigger on the next matching commit point.
    ///
    /// The injector starts disarmed so setup commits run normally.
    pub fn arm(&self) {
        self.observed.store(0, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Disarms the injector.
    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    /// Checks if the crash has been triggered.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Returns the configured commit point.
    pub fn crash_point(&self) -> CommitPoint {
        self.crash_point
    }

    /// Returns the number of commit points observed since arming.
    pub fn observed(&self) -> u32 {
        self.observed.load(Ordering::SeqCst)
    }
}

impl FaultInjector for CrashInjector {
    fn should_fail(&self, point: CommitPoint) -> bool {
        if !self.armed.load(Ordering::SeqCst) || self.crashed.load(Ordering::SeqCst) {
            return false;
        }
        self.observed.fetch_add(1, Ordering::SeqCst);
        let should_crash = point == self.crash_point;
        if should_crash {
            self.crashed.store(true, Ordering::SeqCst);
        }
        should_crash
    }
}
