use std::str::FromStr;
use std::time::Duration;

/// Endpoint and cadence configuration for job watchers.
///
/// All fields have defaults matching a local development backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    /// HTTP base URL of the jobs API (default: `http://localhost:8000`).
    pub api_url: String,
    /// WebSocket base URL for push channels (default: `ws://localhost:8000`).
    pub ws_url: String,
    /// Fallback poll interval for a single tracked job (default: 2 s).
    pub poll_interval: Duration,
    /// Shared poll interval for multi-job aggregation (default: 5 s).
    pub aggregate_interval: Duration,
    /// Per-request HTTP timeout (default: 30 s).
    pub request_timeout: Duration,
    /// WebSocket handshake timeout (default: 10 s).
    pub connect_timeout: Duration,
    /// Consecutive failed poll ticks before a tracker gives up (default: 30).
    pub max_poll_failures: u32,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".into(),
            ws_url: "ws://localhost:8000".into(),
            poll_interval: Duration::from_millis(2000),
            aggregate_interval: Duration::from_millis(5000),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_poll_failures: 30,
        }
    }
}

impl WatchConfig {
    /// Load a `.env` file if present, then read the environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    /// Read configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default                 |
    /// |----------------------------------|-------------------------|
    /// | `JOBWATCH_API_URL`               | `http://localhost:8000` |
    /// | `JOBWATCH_WS_URL`                | `ws://localhost:8000`   |
    /// | `JOBWATCH_POLL_INTERVAL_MS`      | `2000`                  |
    /// | `JOBWATCH_AGGREGATE_INTERVAL_MS` | `5000`                  |
    /// | `JOBWATCH_REQUEST_TIMEOUT_SECS`  | `30`                    |
    /// | `JOBWATCH_CONNECT_TIMEOUT_SECS`  | `10`                    |
    /// | `JOBWATCH_MAX_POLL_FAILURES`     | `30`                    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let api_url = lookup("JOBWATCH_API_URL")
            .map(|v| v.trim_end_matches('/').to_string())
            .unwrap_or(defaults.api_url);
        let ws_url = lookup("JOBWATCH_WS_URL")
            .map(|v| v.trim_end_matches('/').to_string())
            .unwrap_or(defaults.ws_url);

        let poll_interval = match parse_var::<u64>(&lookup, "JOBWATCH_POLL_INTERVAL_MS")? {
            Some(ms) => Duration::from_millis(ms),
            None => defaults.poll_interval,
        };
        let aggregate_interval =
            match parse_var::<u64>(&lookup, "JOBWATCH_AGGREGATE_INTERVAL_MS")? {
                Some(ms) => Duration::from_millis(ms),
                None => defaults.aggregate_interval,
            };
        let request_timeout = match parse_var::<u64>(&lookup, "JOBWATCH_REQUEST_TIMEOUT_SECS")? {
            Some(secs) => Duration::from_secs(secs),
            None => defaults.request_timeout,
        };
        let connect_timeout = match parse_var::<u64>(&lookup, "JOBWATCH_CONNECT_TIMEOUT_SECS")? {
            Some(secs) => Duration::from_secs(secs),
            None => defaults.connect_timeout,
        };
        let max_poll_failures = parse_var::<u32>(&lookup, "JOBWATCH_MAX_POLL_FAILURES")?
            .unwrap_or(defaults.max_poll_failures);

        if poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "JOBWATCH_POLL_INTERVAL_MS",
                reason: "must be greater than zero".into(),
            });
        }
        if aggregate_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "JOBWATCH_AGGREGATE_INTERVAL_MS",
                reason: "must be greater than zero".into(),
            });
        }

        Ok(Self {
            api_url,
            ws_url,
            poll_interval,
            aggregate_interval,
            request_timeout,
            connect_timeout,
            max_poll_failures,
        })
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                key,
                reason: format!("'{raw}' is not a valid number"),
            }),
    }
}

/// Errors raised while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = WatchConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, WatchConfig::default());
    }

    #[test]
    fn overrides_are_applied() {
        let config = WatchConfig::from_lookup(lookup(&[
            ("JOBWATCH_API_URL", "https://jobs.example.com/"),
            ("JOBWATCH_WS_URL", "wss://jobs.example.com"),
            ("JOBWATCH_POLL_INTERVAL_MS", "500"),
            ("JOBWATCH_MAX_POLL_FAILURES", "3"),
        ]))
        .unwrap();

        assert_eq!(config.api_url, "https://jobs.example.com");
        assert_eq!(config.ws_url, "wss://jobs.example.com");
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.max_poll_failures, 3);
        assert_eq!(config.aggregate_interval, Duration::from_secs(5));
    }

    #[test]
    fn non_numeric_value_is_rejected() {
        let err = WatchConfig::from_lookup(lookup(&[("JOBWATCH_POLL_INTERVAL_MS", "fast")]))
            .unwrap_err();
        assert!(err.to_string().contains("JOBWATCH_POLL_INTERVAL_MS"));
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(
            WatchConfig::from_lookup(lookup(&[("JOBWATCH_AGGREGATE_INTERVAL_MS", "0")])).is_err()
        );
    }
}
