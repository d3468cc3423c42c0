//! Retry helper for database writes.
//!
//! A batch's mutations (including their keys) are built once and replayed
//! unchanged on every attempt, so a retried upsert lands on the same rows.

use crate::io::cloud::traits::{CloudIOError, CloudResult};
use std::time::{Duration, Instant};

/// Configuration for retry behavior
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first. `1` disables retries.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// A single attempt.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Retry `operation` with exponential backoff until it succeeds, fails with a
/// non-transient error, runs out of attempts, or the next sleep would cross
/// `deadline`.
///
/// # Errors
///
/// Returns the last error produced by `operation`.
pub fn retry_with_backoff<F, T>(
    config: &RetryConfig,
    deadline: Instant,
    mut operation: F,
) -> CloudResult<T>
where
    F: FnMut(u32) -> CloudResult<T>,
{
    let mut attempt = 0;
    let mut delay_ms = config.initial_delay_ms;

    loop {
        attempt += 1;
        let err: CloudIOError = match operation(attempt) {
            Ok(result) => return Ok(result),
            Err(err) => err,
        };

        let delay = Duration::from_millis(delay_ms);
        let out_of_time = Instant::now() + delay >= deadline;
        if !err.kind.is_transient() || attempt >= config.max_attempts || out_of_time {
            return Err(err);
        }

        tracing::debug!(attempt, delay_ms, error = %err, "retrying after transient error");
        std::thread::sleep(delay);

        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let next = (delay_ms as f64 * config.backoff_multiplier.max(1.0)) as u64;
        delay_ms = next.min(config.max_delay_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::cloud::traits::ErrorKind;

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            backoff_multiplier: 2.0,
        }
    }

    fn later() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[test]
    fn retries_transient_errors() {
        let mut attempts = 0;
        let result = retry_with_backoff(&fast(), later(), |_| {
            attempts += 1;
            if attempts < 3 {
                Err(CloudIOError::new(ErrorKind::Network, "flaky"))
            } else {
                Ok(attempts)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn stops_on_permanent_error() {
        let mut attempts = 0;
        let result: CloudResult<()> = retry_with_backoff(&fast(), later(), |_| {
            attempts += 1;
            Err(CloudIOError::new(ErrorKind::InvalidInput, "bad row"))
        });
        assert_eq!(result.unwrap_err().kind, ErrorKind::InvalidInput);
        assert_eq!(attempts, 1);
    }

    #[test]
    fn single_attempt_config_never_retries() {
        let mut attempts = 0;
        let result: CloudResult<()> = retry_with_backoff(&RetryConfig::none(), later(), |_| {
            attempts += 1;
            Err(CloudIOError::new(ErrorKind::Network, "down"))
        });
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }

    #[test]
    fn gives_up_at_deadline() {
        let mut attempts = 0;
        let result: CloudResult<()> = retry_with_backoff(&fast(), Instant::now(), |_| {
            attempts += 1;
            Err(CloudIOError::new(ErrorKind::Network, "down"))
        });
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }
}
