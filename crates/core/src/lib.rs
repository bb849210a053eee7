//! Shared model for the job status subscription layer.
//!
//! - [`snapshot`]: the immutable [`JobStatusSnapshot`] and the ordering
//!   rules that keep emitted streams monotonic.
//! - [`error`]: the caller-facing [`WatchError`] taxonomy.
//! - [`config`]: environment-driven [`WatchConfig`].

pub mod config;
pub mod error;
pub mod snapshot;
pub mod types;

pub use config::{ConfigError, WatchConfig};
pub use error::WatchError;
pub use snapshot::{JobLog, JobResult, JobStatus, JobStatusSnapshot, LogLevel, LogService};
pub use types::{JobId, Timestamp};
