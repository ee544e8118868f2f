//! Exponential-backoff retry policy for status queries.
//!
//! A poller that hits a transient failure asks its [`Backoff`] for the
//! next delay. Once [`RetryConfig::max_retries`] consecutive failures have
//! been absorbed the backoff is exhausted and the task is marked failed.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Consecutive failures tolerated before giving up.
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            max_retries: 5,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`RetryConfig::max_delay`].
pub fn next_delay(current: Duration, config: &RetryConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Consecutive-failure counter with a growing delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    delay: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        let delay = config.initial_delay.min(config.max_delay);
        Self {
            config,
            delay,
            attempts: 0,
        }
    }

    /// Record a failure. Returns the delay to wait before retrying, or
    /// `None` once the retry budget is spent.
    pub fn next(&mut self) -> Option<Duration> {
        if self.attempts >= self.config.max_retries {
            return None;
        }
        self.attempts += 1;
        let delay = self.delay;
        self.delay = next_delay(self.delay, &self.config);
        Some(delay)
    }

    /// Forget previous failures after a successful attempt.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.delay = self.config.initial_delay.min(self.config.max_delay);
    }

    /// Failures recorded since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Sleep for `delay` unless `cancel` fires first.
///
/// Returns `false` if the sleep was cut short by cancellation.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
