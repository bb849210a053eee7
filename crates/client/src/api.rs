//! REST client for the jobs status endpoint.
//!
//! [`JobsApi`] wraps `GET /jobs/{job_id}` using [`reqwest`] and implements
//! [`StatusFetcher`], the pull seam the trackers are written against.

use std::time::Duration;

use async_trait::async_trait;
use jobwatch_core::error::WatchError;
use jobwatch_core::snapshot::JobStatusSnapshot;
use jobwatch_core::types::JobId;

use crate::messages::{parse_snapshot, MessageError};

/// Fetch the current snapshot of one job on demand.
///
/// Implementations perform exactly one round trip per call and never
/// retry; retry policy belongs to the caller.
#[async_trait]
pub trait StatusFetcher: Send + Sync {
    async fn fetch(&self, job_id: &JobId) -> Result<JobStatusSnapshot, FetchError>;
}

/// HTTP client for the jobs API.
pub struct JobsApi {
    client: reqwest::Client,
    api_url: String,
}

/// Errors from the jobs REST layer.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The backend has no record of the job.
    #[error("Job {0} not found")]
    NotFound(JobId),

    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend returned a non-2xx status other than 404.
    #[error("Jobs API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The body could not be translated into a snapshot.
    #[error("Invalid job payload: {0}")]
    Decode(#[from] MessageError),
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<FetchError> for WatchError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::NotFound(job_id) => WatchError::NotFound { job_id },
            FetchError::Decode(e) => WatchError::MalformedMessage(e.to_string()),
            other => WatchError::Transport(other.to_string()),
        }
    }
}

impl JobsApi {
    /// Create a client with a per-request timeout.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8000`.
    pub fn new(api_url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, api_url))
    }

    /// Create a client reusing an existing [`reqwest::Client`]
    /// (useful for sharing one connection pool across watchers).
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Retrieve the current state of a job.
    ///
    /// Sends a `GET /jobs/{job_id}` request and translates the snake_case
    /// body into a [`JobStatusSnapshot`].
    pub async fn get_job(&self, job_id: &JobId) -> Result<JobStatusSnapshot, FetchError> {
        let response = self
            .client
            .get(format!("{}/jobs/{}", self.api_url, job_id))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(job_id.clone()));
        }

        let response = Self::ensure_success(response).await?;
        let text = response.text().await?;
        Ok(parse_snapshot(&text, job_id)?)
    }

    // ---- private helpers ----

    /// Return the response unchanged on success, or a
    /// [`FetchError::Api`] carrying the status and body text.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, FetchError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(FetchError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl StatusFetcher for JobsApi {
    async fn fetch(&self, job_id: &JobId) -> Result<JobStatusSnapshot, FetchError> {
        let result = self.get_job(job_id).await;
        if let Err(e) = &result {
            tracing::debug!(job_id = %job_id, error = %e, "Job status fetch failed");
        }
        result
    }
}
