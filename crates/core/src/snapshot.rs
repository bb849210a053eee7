//! Job status snapshot model.
//!
//! A [`JobStatusSnapshot`] is one immutable observation of a backend job.
//! Snapshots arrive from two independent channels (HTTP polling and the
//! push socket), so consumers never overwrite state blindly: they ask
//! [`JobStatusSnapshot::supersedes`] first.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a backend job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// `completed` and `failed` are terminal; no transition leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Position in the `pending < running < terminal` order.
    ///
    /// Both terminal statuses share the highest rank.
    pub fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Logs and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// Pipeline stage that produced a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogService {
    Harvester,
    Processor,
    Orchestrator,
}

/// One log line attached to a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobLog {
    /// `None` when the backend sent a bare message string.
    pub timestamp: Option<Timestamp>,
    pub level: LogLevel,
    pub message: String,
    pub service: LogService,
}

/// Summary counts reported by a completed job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub harvested_items: u64,
    pub processed_items: u64,
    pub dataset_rows_added: u64,
    pub errors: u64,
    pub warnings: u64,
}

// ---------------------------------------------------------------------------
// JobStatusSnapshot
// ---------------------------------------------------------------------------

/// One observation of a job's state.
///
/// Field consistency is guaranteed by [`normalized`](Self::normalized):
/// `completed_at` only on terminal snapshots, `error` only on `failed`,
/// `result` only on `completed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusSnapshot {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Completion percentage (0-100).
    pub progress: u8,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    /// Backend last-modified time, used as the recency key when present.
    pub updated_at: Option<Timestamp>,
    /// Integration the job was started for, when the backend reports it.
    #[serde(default)]
    pub integration_id: Option<String>,
    pub error: Option<String>,
    pub result: Option<JobResult>,
    /// Every log line observed so far, oldest first.
    #[serde(default)]
    pub logs: Vec<JobLog>,
}

impl JobStatusSnapshot {
    /// A bare snapshot with no timestamps, logs, or outcome.
    pub fn new(job_id: impl Into<JobId>, status: JobStatus) -> Self {
        Self {
            job_id: job_id.into(),
            status,
            progress: 0,
            started_at: None,
            completed_at: None,
            updated_at: None,
            integration_id: None,
            error: None,
            result: None,
            logs: Vec::new(),
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = progress.min(100);
        self
    }

    pub fn with_updated_at(mut self, updated_at: Timestamp) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    pub fn with_integration_id(mut self, integration_id: impl Into<String>) -> Self {
        self.integration_id = Some(integration_id.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_result(mut self, result: JobResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_log(mut self, log: JobLog) -> Self {
        self.logs.push(log);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Drop fields that contradict the status.
    pub fn normalized(mut self) -> Self {
        self.progress = self.progress.min(100);
        if !self.status.is_terminal() {
            self.completed_at = None;
        }
        if self.status != JobStatus::Failed {
            self.error = None;
        }
        if self.status != JobStatus::Completed {
            self.result = None;
        }
        self
    }

    /// Whether `self` may replace `prev` as the latest known state.
    ///
    /// Terminal is one-way, status never regresses in the
    /// `pending < running < terminal` order, and within the same rank the
    /// more recent snapshot wins: by `updated_at` when both carry one,
    /// otherwise by progress. Ties go to the snapshot holding at least as
    /// many log lines, so the log list never shrinks. An identical
    /// snapshot never supersedes, so repeated polls of an unchanged job
    /// produce no updates.
    pub fn supersedes(&self, prev: &JobStatusSnapshot) -> bool {
        if prev.is_terminal() || self == prev {
            return false;
        }

        let (rank, prev_rank) = (self.status.rank(), prev.status.rank());
        if rank != prev_rank {
            return rank > prev_rank;
        }

        let more_logs = self.logs.len() >= prev.logs.len();
        match (self.updated_at, prev.updated_at) {
            (Some(at), Some(prev_at)) => at > prev_at || (at == prev_at && more_logs),
            _ => self.progress > prev.progress || (self.progress == prev.progress && more_logs),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;

    fn snap(status: JobStatus, progress: u8) -> JobStatusSnapshot {
        JobStatusSnapshot::new("job-1", status).with_progress(progress)
    }

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert_eq!(JobStatus::Completed.rank(), JobStatus::Failed.rank());
    }

    #[test]
    fn status_parses_and_displays() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<JobStatus>(), Ok(status));
        }
        assert!("cancelled".parse::<JobStatus>().is_err());
    }

    #[test]
    fn higher_rank_supersedes() {
        let pending = snap(JobStatus::Pending, 0);
        let running = snap(JobStatus::Running, 10);
        let done = snap(JobStatus::Completed, 100);

        assert!(running.supersedes(&pending));
        assert!(done.supersedes(&running));
        assert!(done.supersedes(&pending));
    }

    #[test]
    fn status_never_regresses() {
        let pending = snap(JobStatus::Pending, 0);
        let running = snap(JobStatus::Running, 90);

        assert!(!pending.supersedes(&running));
    }

    #[test]
    fn nothing_supersedes_terminal() {
        let completed = snap(JobStatus::Completed, 100);
        let failed = snap(JobStatus::Failed, 100).with_error("boom");
        let running = snap(JobStatus::Running, 100);

        assert!(!failed.supersedes(&completed));
        assert!(!running.supersedes(&completed));
        assert!(!completed.supersedes(&failed));
    }

    #[test]
    fn same_rank_prefers_newer_timestamp() {
        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let older = snap(JobStatus::Running, 80).with_updated_at(t0);
        let newer = snap(JobStatus::Running, 40).with_updated_at(t0 + Duration::seconds(5));

        assert!(newer.supersedes(&older));
        assert!(!older.supersedes(&newer));
    }

    #[test]
    fn same_rank_without_timestamps_prefers_progress() {
        let at_40 = snap(JobStatus::Running, 40);
        let at_60 = snap(JobStatus::Running, 60);

        assert!(at_60.supersedes(&at_40));
        assert!(!at_40.supersedes(&at_60));
    }

    #[test]
    fn identical_snapshot_does_not_supersede() {
        let a = snap(JobStatus::Running, 40);
        assert!(!a.clone().supersedes(&a));
    }

    #[test]
    fn new_log_lines_supersede_at_equal_progress() {
        let before = snap(JobStatus::Running, 40);
        let after = before.clone().with_log(JobLog {
            timestamp: None,
            level: LogLevel::Info,
            message: "harvested page 2".into(),
            service: LogService::Harvester,
        });

        assert!(after.supersedes(&before));
    }

    #[test]
    fn normalized_drops_inconsistent_fields() {
        let mut running = snap(JobStatus::Running, 120)
            .with_error("stale")
            .with_result(JobResult::default());
        running.completed_at = Some(Utc::now());

        let running = running.normalized();
        assert_eq!(running.progress, 100);
        assert!(running.error.is_none());
        assert!(running.result.is_none());
        assert!(running.completed_at.is_none());

        let failed = snap(JobStatus::Failed, 50)
            .with_error("timeout")
            .with_result(JobResult::default())
            .normalized();
        assert_eq!(failed.error.as_deref(), Some("timeout"));
        assert!(failed.result.is_none());
    }

    #[test]
    fn fewer_log_lines_never_supersede_at_equal_progress() {
        let line = |message: &str| JobLog {
            timestamp: None,
            level: LogLevel::Info,
            message: message.into(),
            service: LogService::Processor,
        };
        let shorter = snap(JobStatus::Running, 40).with_log(line("page 1"));
        let longer = shorter.clone().with_log(line("page 2"));

        assert!(!shorter.supersedes(&longer));
        assert!(longer.supersedes(&shorter));

        let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let (shorter, longer) = (shorter.with_updated_at(t0), longer.with_updated_at(t0));
        assert!(!shorter.supersedes(&longer));
        assert!(longer.supersedes(&shorter));
    }

    #[test]
    fn serializes_camel_case() {
        let value = serde_json::to_value(
            snap(JobStatus::Completed, 100).with_result(JobResult {
                harvested_items: 3,
                ..Default::default()
            }),
        )
        .unwrap();

        assert_eq!(value["jobId"], "job-1");
        assert_eq!(value["status"], "completed");
        assert_eq!(value["result"]["harvestedItems"], 3);
        assert!(value["completedAt"].is_null());
        assert!(value["integrationId"].is_null());
    }
}
