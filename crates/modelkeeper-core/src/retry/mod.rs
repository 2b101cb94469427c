//! Retry logic with capped backoff.
//!
//! The delay before retry `n` (1-based) is
//! `min(initial_delay * n * backoff_factor, max_delay)`, so delays grow
//! strictly until they reach the cap. Whether an error is retried is decided
//! by a predicate over the error, normally [`KeeperError::is_retryable`].
//! A cancellation token cuts a backoff sleep short and ends the loop.
//!
//! [`KeeperError::is_retryable`]: crate::error::KeeperError::is_retryable

mod resume;

pub use resume::{pull_with_retry, resume};

use crate::cancel::CancellationToken;
use crate::config::DownloadConfig;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RetryConfig {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    /// Base delay between retries.
    #[serde(with = "crate::config::duration_secs")]
    pub initial_delay: Duration,
    /// Maximum delay cap.
    #[serde(with = "crate::config::duration_secs")]
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DownloadConfig::DEFAULT_MAX_RETRIES,
            initial_delay: DownloadConfig::DEFAULT_INITIAL_DELAY,
            max_delay: DownloadConfig::DEFAULT_MAX_DELAY,
            backoff_factor: DownloadConfig::DEFAULT_BACKOFF_FACTOR,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Total number of attempts this config allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let factor = if self.backoff_factor.is_finite() && self.backoff_factor > 0.0 {
            self.backoff_factor
        } else {
            1.0
        };
        let secs = self.initial_delay.as_secs_f64() * f64::from(attempt.max(1)) * factor;
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

/// Statistics about a retry operation.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    /// Number of attempts made.
    pub attempts: u32,
    /// Delays slept between attempts, in order.
    pub delays: Vec<Duration>,
    pub success: bool,
    /// The loop stopped because the token was cancelled during a backoff.
    pub cancelled: bool,
    pub last_error: Option<String>,
}

impl RetryStats {
    pub fn total_delay(&self) -> Duration {
        self.delays.iter().sum()
    }
}

/// Retry an async operation with capped backoff.
///
/// `operation` receives the 1-based attempt number. A failure for which
/// `should_retry` returns false ends the loop immediately. Cancelling `cancel`
/// while the loop sleeps returns the last error with `stats.cancelled` set.
pub async fn retry_async<F, Fut, T, E>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
    should_retry: impl Fn(&E) -> bool,
) -> (Result<T, E>, RetryStats)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut stats = RetryStats::default();
    let max_attempts = config.max_attempts();
    let mut attempt = 1;

    loop {
        stats.attempts = attempt;

        match operation(attempt).await {
            Ok(value) => {
                stats.success = true;
                if attempt > 1 {
                    debug!("Operation succeeded after {} attempts", attempt);
                }
                return (Ok(value), stats);
            }
            Err(e) => {
                stats.last_error = Some(e.to_string());

                if !should_retry(&e) {
                    debug!("Error is not retryable: {}", e);
                    return (Err(e), stats);
                }

                if attempt >= max_attempts {
                    warn!(
                        "All {} attempts exhausted. Last error: {}",
                        max_attempts, e
                    );
                    return (Err(e), stats);
                }

                let delay = config.calculate_delay(attempt);
                stats.delays.push(delay);

                warn!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}",
                    attempt, max_attempts, e, delay
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        debug!("Retry cancelled while waiting after attempt {}", attempt);
                        stats.cancelled = true;
                        return (Err(e), stats);
                    }
                }
                attempt += 1;
            }
        }
    }
}
