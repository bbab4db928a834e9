//! Exponential backoff policy for durable retries.
//!
//! The delay before attempt `n + 1` is
//! `min(initial_interval * backoff_coefficient^(n - 1), max_interval)`.
//! Retrying stops once `max_attempts` attempts have run or the elapsed time
//! since the first attempt reaches `total_timeout`.

use core_runtime::config::{RetrySettings, BACKOFF_COEFFICIENT};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    pub max_interval: Duration,
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub total_timeout: Duration,
}

impl RetryPolicy {
    /// Fixed-interval policy with no overall timeout.
    #[must_use]
    pub fn new(initial_interval: Duration, max_attempts: u32) -> Self {
        Self {
            initial_interval,
            backoff_coefficient: 1.0,
            max_interval: initial_interval,
            max_attempts: max_attempts.max(1),
            total_timeout: Duration::MAX,
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, coefficient: f64, max_interval: Duration) -> Self {
        self.backoff_coefficient = coefficient;
        self.max_interval = max_interval.max(self.initial_interval);
        self
    }

    #[must_use]
    pub fn with_total_timeout(mut self, total_timeout: Duration) -> Self {
        self.total_timeout = total_timeout;
        self
    }

    /// Delay to wait after the given failed attempt (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled =
            self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        let capped = scaled.min(self.max_interval.as_secs_f64());

        Duration::try_from_secs_f64(capped)
            .unwrap_or(self.max_interval)
            .min(self.max_interval)
    }

    /// Whether another attempt may follow the given failed attempt.
    #[must_use]
    pub fn should_retry(&self, attempt: u32, elapsed: Duration) -> bool {
        attempt < self.max_attempts && elapsed < self.total_timeout
    }

    /// Delay before the next attempt, or `None` when the budget is spent.
    #[must_use]
    pub fn next_delay(&self, attempt: u32, elapsed: Duration) -> Option<Duration> {
        self.should_retry(attempt, elapsed)
            .then(|| self.delay_for(attempt))
    }
}

impl From<RetrySettings> for RetryPolicy {
    fn from(settings: RetrySettings) -> Self {
        Self {
            initial_interval: settings.initial_interval,
            backoff_coefficient: BACKOFF_COEFFICIENT,
            max_interval: settings.max_interval.max(settings.initial_interval),
            max_attempts: settings.max_attempts.max(1),
            total_timeout: settings.total_timeout,
        }
    }
}
