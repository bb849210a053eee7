//! Backend job payloads and their translation into snapshots.
//!
//! The jobs API and the push socket both speak snake_case JSON with a few
//! historical quirks (push frames say `job_id` where the REST body says
//! `id`, logs may be bare strings, result error lists instead of counts).
//! [`BackendJob`] absorbs those quirks and [`BackendJob::into_snapshot`]
//! performs the one-time translation into [`JobStatusSnapshot`].

use jobwatch_core::snapshot::{JobLog, JobResult, JobStatus, JobStatusSnapshot, LogLevel, LogService};
use jobwatch_core::types::{JobId, Timestamp};
use serde::Deserialize;

/// A job as serialized by the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendJob {
    #[serde(default, alias = "job_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub integration_id: Option<String>,
    pub status: String,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub started_at: Option<Timestamp>,
    #[serde(default)]
    pub completed_at: Option<Timestamp>,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
    #[serde(default, alias = "error")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub logs: Option<Vec<BackendLog>>,
    #[serde(default)]
    pub result: Option<BackendResult>,
}

/// A log line: either a bare message or a structured entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BackendLog {
    Line(String),
    Entry {
        #[serde(default)]
        timestamp: Option<Timestamp>,
        #[serde(default)]
        level: Option<String>,
        message: String,
        #[serde(default)]
        service: Option<String>,
    },
}

/// Counts reported by a finished job.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendResult {
    #[serde(default)]
    pub items_harvested: u64,
    #[serde(default)]
    pub items_processed: u64,
    #[serde(default)]
    pub items_inserted: u64,
    #[serde(default)]
    pub errors: Option<Tally>,
    #[serde(default)]
    pub warnings: Option<Tally>,
}

/// Either an explicit count or the list of things being counted.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Tally {
    Count(u64),
    Items(Vec<serde_json::Value>),
}

impl Tally {
    pub fn count(&self) -> u64 {
        match self {
            Self::Count(n) => *n,
            Self::Items(items) => items.len() as u64,
        }
    }
}

/// Why a payload could not become a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Status(String),

    #[error("payload is for job {got}, expected {expected}")]
    WrongJob { expected: JobId, got: String },
}

impl BackendJob {
    /// Translate into the internal snapshot shape.
    ///
    /// `expected` is the job the payload was requested for. A payload
    /// without an id inherits it; a payload naming a different job is
    /// rejected.
    pub fn into_snapshot(self, expected: &str) -> Result<JobStatusSnapshot, MessageError> {
        let job_id = match self.id {
            Some(id) if id != expected => {
                return Err(MessageError::WrongJob {
                    expected: expected.to_string(),
                    got: id,
                })
            }
            _ => expected.to_string(),
        };

        let status: JobStatus = self.status.parse().map_err(MessageError::Status)?;
        let progress = self
            .progress
            .filter(|p| p.is_finite())
            .map(|p| p.clamp(0.0, 100.0) as u8)
            .unwrap_or(0);

        let logs = self
            .logs
            .unwrap_or_default()
            .into_iter()
            .map(BackendLog::into_log)
            .collect();

        let result = self.result.map(|r| JobResult {
            harvested_items: r.items_harvested,
            processed_items: r.items_processed,
            dataset_rows_added: r.items_inserted,
            errors: r.errors.as_ref().map(Tally::count).unwrap_or(0),
            warnings: r.warnings.as_ref().map(Tally::count).unwrap_or(0),
        });

        Ok(JobStatusSnapshot {
            job_id,
            status,
            progress,
            started_at: self.started_at,
            completed_at: self.completed_at,
            updated_at: self.updated_at,
            integration_id: self.integration_id,
            error: self.error_message,
            result,
            logs,
        }
        .normalized())
    }
}

impl BackendLog {
    fn into_log(self) -> JobLog {
        match self {
            Self::Line(message) => JobLog {
                timestamp: None,
                level: LogLevel::Info,
                message,
                service: LogService::Orchestrator,
            },
            Self::Entry {
                timestamp,
                level,
                message,
                service,
            } => JobLog {
                timestamp,
                level: match level.as_deref() {
                    Some("warning" | "warn") => LogLevel::Warning,
                    Some("error") => LogLevel::Error,
                    _ => LogLevel::Info,
                },
                message,
                service: match service.as_deref() {
                    Some("harvester") => LogService::Harvester,
                    Some("processor") => LogService::Processor,
                    _ => LogService::Orchestrator,
                },
            },
        }
    }
}

/// Parse a JSON payload (REST body or push frame) for `job_id`.
pub fn parse_snapshot(text: &str, job_id: &str) -> Result<JobStatusSnapshot, MessageError> {
    let job: BackendJob = serde_json::from_str(text)?;
    job.into_snapshot(job_id)
}
