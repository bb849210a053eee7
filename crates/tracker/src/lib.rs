//! Live job status subscriptions.
//!
//! - [`watch_job`] tracks one job: push channel first, polling as a
//!   fallback, with a monotonic stream of [`JobUpdate`]s that ends at the
//!   first terminal snapshot.
//! - [`watch_jobs`] keeps an [`AggregatorTable`] for a set of jobs on one
//!   shared poll cadence.
//! - [`Watcher`] wires both to the HTTP API and WebSocket endpoint named
//!   by a [`WatchConfig`].

pub mod aggregator;
pub mod config;
pub mod events;
pub mod poll;
pub mod race;
pub mod reconnect;
pub mod tracker;

mod subscriber;

use std::sync::Arc;

use jobwatch_client::{FetchError, JobsApi, PushTransport, StatusFetcher, WsTransport};
use jobwatch_core::config::WatchConfig;
use jobwatch_core::types::JobId;

pub use aggregator::{watch_jobs, AggregatorTable, JobsWatch, TableEntry};
pub use config::{AggregatorConfig, TrackerConfig};
pub use events::{JobUpdate, TrackerState};
pub use poll::{PollHandle, PollLoop};
pub use reconnect::ReconnectConfig;
pub use tracker::{watch_job, JobWatch};

/// Entry point bound to one backend.
///
/// Holds the shared HTTP client and WebSocket transport so every watch
/// started from it reuses the same connections and settings.
#[derive(Clone)]
pub struct Watcher {
    fetcher: Arc<dyn StatusFetcher>,
    transport: Arc<dyn PushTransport>,
    tracker: TrackerConfig,
    aggregator: AggregatorConfig,
}

impl Watcher {
    /// Build the production fetcher and transport from `config`.
    pub fn from_config(config: &WatchConfig) -> Result<Self, FetchError> {
        let fetcher = JobsApi::new(config.api_url.clone(), config.request_timeout)?;
        let transport = WsTransport::new(config.ws_url.clone(), config.connect_timeout);
        Ok(Self::new(
            Arc::new(fetcher),
            Arc::new(transport),
            TrackerConfig::from(config),
            AggregatorConfig::from(config),
        ))
    }

    pub fn new(
        fetcher: Arc<dyn StatusFetcher>,
        transport: Arc<dyn PushTransport>,
        tracker: TrackerConfig,
        aggregator: AggregatorConfig,
    ) -> Self {
        Self {
            fetcher,
            transport,
            tracker,
            aggregator,
        }
    }

    pub fn watch_job<F>(&self, job_id: impl Into<JobId>, on_update: F) -> JobWatch
    where
        F: FnMut(JobUpdate) + Send + 'static,
    {
        watch_job(
            Arc::clone(&self.fetcher),
            Arc::clone(&self.transport),
            job_id,
            self.tracker.clone(),
            on_update,
        )
    }

    pub fn watch_jobs<I, S, F>(&self, job_ids: I, on_update: F) -> JobsWatch
    where
        I: IntoIterator<Item = S>,
        S: Into<JobId>,
        F: FnMut(AggregatorTable) + Send + 'static,
    {
        watch_jobs(
            Arc::clone(&self.fetcher),
            job_ids,
            self.aggregator.clone(),
            on_update,
        )
    }
}
