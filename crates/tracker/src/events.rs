//! Updates and states a watcher reports to its caller.

use jobwatch_core::error::WatchError;
use jobwatch_core::snapshot::JobStatusSnapshot;

/// One delivery from a single-job tracker.
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    /// A snapshot newer than anything delivered before.
    Snapshot(JobStatusSnapshot),
    /// Tracking ended without a terminal snapshot.
    Failed(WatchError),
}

impl JobUpdate {
    /// Whether this is the last update the tracker will deliver.
    pub fn is_final(&self) -> bool {
        match self {
            Self::Snapshot(snapshot) => snapshot.is_terminal(),
            Self::Failed(_) => true,
        }
    }

    pub fn snapshot(&self) -> Option<&JobStatusSnapshot> {
        match self {
            Self::Snapshot(snapshot) => Some(snapshot),
            Self::Failed(_) => None,
        }
    }
}

/// Lifecycle of a single-job tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    /// Created, initial fetch not yet issued.
    Idle,
    /// Initial fetch in flight.
    Loading,
    /// A push channel is authoritative.
    PushActive,
    /// The poll loop is authoritative (a push reopen may be racing it).
    PollActive,
    /// Terminal for the tracker: no further updates.
    Closed,
}
