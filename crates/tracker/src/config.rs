use std::time::Duration;

use jobwatch_core::config::WatchConfig;

use crate::reconnect::ReconnectConfig;

/// Cadence and retry bounds for a single-job tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    /// Poll interval used after a push channel failure.
    pub poll_interval: Duration,
    /// When and how often to retry the push channel while polling.
    pub reconnect: ReconnectConfig,
    /// Consecutive failed poll ticks before giving up on the job.
    pub max_poll_failures: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self::from(&WatchConfig::default())
    }
}

impl From<&WatchConfig> for TrackerConfig {
    fn from(config: &WatchConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            reconnect: ReconnectConfig::default(),
            max_poll_failures: config.max_poll_failures.max(1),
        }
    }
}

/// Cadence for the multi-job aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Shared tick interval for all watched jobs.
    pub interval: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self::from(&WatchConfig::default())
    }
}

impl From<&WatchConfig> for AggregatorConfig {
    fn from(config: &WatchConfig) -> Self {
        Self {
            interval: config.aggregate_interval,
        }
    }
}
