use crate::ConfigError;
use core::time::Duration;

/// Exponential backoff applied to retryable activity failures.
///
/// An activity is attempted at most [`max_attempts`](Self::max_attempts)
/// times. Before attempt `n + 1` the host waits
/// `first_retry_interval * backoff_coefficient^(n - 1)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    first_retry_interval: Duration,
    max_attempts: u32,
    backoff_coefficient: f64,
}

impl RetryPolicy {
    /// Default attempt ceiling.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
    /// Default wait before the first retry.
    pub const DEFAULT_FIRST_RETRY_INTERVAL: Duration = Duration::from_millis(5000);
    /// Default growth factor between consecutive waits.
    pub const DEFAULT_BACKOFF_COEFFICIENT: f64 = 1.5;

    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidRetryPolicy`] if `max_attempts` is zero
    /// or `backoff_coefficient` is not a finite number `>= 1`.
    pub fn new(
        first_retry_interval: Duration,
        max_attempts: u32,
        backoff_coefficient: f64,
    ) -> crate::Result<Self> {
        if max_attempts == 0 {
            return Err(ConfigError::InvalidRetryPolicy {
                reason: "max attempts must be greater than zero".to_string(),
            });
        }
        if !backoff_coefficient.is_finite() || backoff_coefficient < 1.0 {
            return Err(ConfigError::InvalidRetryPolicy {
                reason: format!("backoff coefficient must be >= 1, got {backoff_coefficient}"),
            });
        }
        Ok(Self {
            first_retry_interval,
            max_attempts,
            backoff_coefficient,
        })
    }

    /// A policy that never retries.
    pub const fn no_retry() -> Self {
        Self {
            first_retry_interval: Duration::ZERO,
            max_attempts: 1,
            backoff_coefficient: 1.0,
        }
    }

    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub const fn first_retry_interval(&self) -> Duration {
        self.first_retry_interval
    }

    pub const fn backoff_coefficient(&self) -> f64 {
        self.backoff_coefficient
    }

    /// Wait before the retry that follows failed attempt `attempt`
    /// (1-based), or `None` once the ceiling is reached.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt >= self.max_attempts {
            return None;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let factor = self.backoff_coefficient.powi(exponent);
        Some(Duration::try_from_secs_f64(self.first_retry_interval.as_secs_f64() * factor)
            .unwrap_or(Duration::MAX))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            first_retry_interval: Self::DEFAULT_FIRST_RETRY_INTERVAL,
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            backoff_coefficient: Self::DEFAULT_BACKOFF_COEFFICIENT,
        }
    }
}
