//! Provider usage counters.
//!
//! Counters are atomic and can be read while sessions are in use. They are
//! mostly useful in tests that assert on session hygiene (every acquired
//! session released once, one physical commit per top-level transaction).

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters owned by a provider.
#[derive(Debug, Default)]
pub(crate) struct ProviderCounters {
    acquired: AtomicU64,
    released: AtomicU64,
    commits: AtomicU64,
    empty_commits: AtomicU64,
    rollbacks: AtomicU64,
    conflicts: AtomicU64,
}

impl ProviderCounters {
    pub(crate) fn record_acquire(&self) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_release(&self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self, empty: bool) {
        self.commits.fetch_add(1, Ordering::Relaxed);
        if empty {
            self.empty_commits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, open_sessions: usize) -> ProviderStats {
        ProviderStats {
            acquired: self.acquired.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            empty_commits: self.empty_commits.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            open_sessions,
        }
    }
}

/// A point-in-time snapshot of provider counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderStats {
    /// Sessions handed out.
    pub acquired: u64,
    /// Sessions given back.
    pub released: u64,
    /// Physical commits, including commits with nothing to write.
    pub commits: u64,
    /// Commits that had no pending writes.
    pub empty_commits: u64,
    /// Rollbacks that discarded pending writes.
    pub rollbacks: u64,
    /// Commits rejected because of a concurrent change.
    pub conflicts: u64,
    /// Sessions currently handed out.
    pub open_sessions: usize,
}
