//! Sync status events and run reports.

use offgrid_protocol::{Conflict, EntryStatus, FailureKind};
use serde::{Deserialize, Serialize};

/// How a replay run ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    /// Every replayable entry was attempted or deliberately deferred.
    #[default]
    Completed,
    /// Another run was in flight; nothing was done.
    AlreadySyncing,
    /// The run was cancelled between entries.
    Cancelled,
}

/// Outcome of one [`crate::SyncManager::sync`] run, by entry sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// How the run ended.
    pub status: SyncRunStatus,
    /// Entries the remote accepted.
    pub submitted: Vec<u64>,
    /// Conflicts settled by an automatic policy.
    pub resolved: Vec<u64>,
    /// Conflicts left for manual resolution.
    pub conflicts: Vec<u64>,
    /// Entries that failed (transport or rejection).
    pub failed: Vec<u64>,
    /// Entries not attempted because of an earlier failure or the attempt
    /// limit.
    pub deferred: Vec<u64>,
}

impl SyncReport {
    pub(crate) fn with_status(status: SyncRunStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Returns true if nothing failed, conflicted or was deferred.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.status == SyncRunStatus::Completed
            && self.failed.is_empty()
            && self.conflicts.is_empty()
            && self.deferred.is_empty()
    }

    /// Returns the number of entries attempted against the network.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.submitted.len() + self.resolved.len() + self.conflicts.len() + self.failed.len()
    }
}

/// Events published to [`crate::SyncManager::on_sync_status_changed`]
/// subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The number of unsubmitted entries changed.
    QueueChanged {
        /// Entries not yet submitted.
        pending: usize,
    },
    /// An entry changed status.
    EntryStatusChanged {
        /// Entry sequence.
        sequence: u64,
        /// New status.
        status: EntryStatus,
        /// Failure detail for `Failed`.
        failure: Option<FailureKind>,
    },
    /// The remote reported a conflict.
    ConflictDetected(Conflict),
    /// A replay run started.
    SyncStarted {
        /// Replayable entries at the start of the run.
        replayable: usize,
    },
    /// A replay run finished.
    SyncFinished(SyncReport),
}
