use crate::types::JobId;

/// Errors a watcher can report to its caller.
///
/// Only [`WatchError::NotFound`] (on the initial read) and
/// [`WatchError::GaveUp`] are ever surfaced as terminal updates; the other
/// variants are absorbed by the fallback machinery and only show up in
/// logs or in an aggregator entry's `last_error`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WatchError {
    #[error("Job not found: {job_id}")]
    NotFound { job_id: JobId },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Gave up watching job {job_id} after {attempts} failed attempts")]
    GaveUp { job_id: JobId, attempts: u32 },
}

impl WatchError {
    /// Whether this error ends tracking for the job.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::GaveUp { .. })
    }
}
