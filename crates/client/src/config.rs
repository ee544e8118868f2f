use std::time::Duration;

use crate::api::TaskEndpoints;
use crate::poller::PollConfig;
use crate::retry::RetryConfig;

/// Error raised for an environment variable that cannot be parsed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Task-service client configuration loaded from environment variables.
///
/// All fields have defaults suitable for a local backend.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the task service (default: `http://localhost:3000`).
    pub api_url: String,
    /// Delay between two status queries of the same task (default: 2 s).
    pub poll_interval: Duration,
    /// Backoff applied to transient status-query failures.
    pub retry: RetryConfig,
    /// Per-request HTTP timeout (default: 30 s).
    pub request_timeout: Duration,
    /// Endpoint paths relative to `api_url`.
    pub endpoints: TaskEndpoints,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:3000".to_string(),
            poll_interval: PollConfig::default().interval,
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(30),
            endpoints: TaskEndpoints::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from the process environment with defaults.
    ///
    /// | Env Var                 | Default                 |
    /// |-------------------------|-------------------------|
    /// | `TASK_API_URL`          | `http://localhost:3000` |
    /// | `POLL_INTERVAL_MS`      | `2000`                  |
    /// | `POLL_MAX_RETRIES`      | `5`                     |
    /// | `POLL_RETRY_INITIAL_MS` | `500`                   |
    /// | `POLL_RETRY_MAX_MS`     | `10000`                 |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                    |
    /// | `TASK_CREATE_PATH`      | `/create-task`          |
    /// | `TASK_STATUS_PATH`      | `/task-status`          |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let read = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_url = read("TASK_API_URL").unwrap_or(defaults.api_url);

        let poll_interval = match read("POLL_INTERVAL_MS") {
            Some(v) => Duration::from_millis(parse_positive("POLL_INTERVAL_MS", &v)?),
            None => defaults.poll_interval,
        };

        let max_retries = match read("POLL_MAX_RETRIES") {
            Some(v) => u32::try_from(parse_u64("POLL_MAX_RETRIES", &v)?).map_err(|_| {
                ConfigError::Invalid {
                    var: "POLL_MAX_RETRIES",
                    value: v.clone(),
                    reason: "out of range".to_string(),
                }
            })?,
            None => defaults.retry.max_retries,
        };

        let initial_delay = match read("POLL_RETRY_INITIAL_MS") {
            Some(v) => Duration::from_millis(parse_positive("POLL_RETRY_INITIAL_MS", &v)?),
            None => defaults.retry.initial_delay,
        };

        let max_delay = match read("POLL_RETRY_MAX_MS") {
            Some(v) => Duration::from_millis(parse_positive("POLL_RETRY_MAX_MS", &v)?),
            None => defaults.retry.max_delay,
        };

        let request_timeout = match read("REQUEST_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(parse_positive("REQUEST_TIMEOUT_SECS", &v)?),
            None => defaults.request_timeout,
        };

        let mut endpoints = defaults.endpoints;
        if let Some(path) = read("TASK_CREATE_PATH") {
            endpoints.create_path = path;
        }
        if let Some(path) = read("TASK_STATUS_PATH") {
            endpoints.status_path = path;
        }

        Ok(Self {
            api_url,
            poll_interval,
            retry: RetryConfig {
                initial_delay,
                max_delay,
                max_retries,
                ..defaults.retry
            },
            request_timeout,
            endpoints,
        })
    }

    /// Poller settings derived from this configuration.
    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: self.poll_interval,
            retry: self.retry.clone(),
            ..PollConfig::default()
        }
    }
}

fn parse_u64(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_positive(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    match parse_u64(var, value)? {
        0 => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        n => Ok(n),
    }
}
