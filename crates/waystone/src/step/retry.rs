//! Retry budget for step execution.

use std::time::Duration;

/// Retry budget and exponential backoff for retryable step failures.
///
/// When a step returns [`StepError::Retryable`](super::StepError::Retryable)
/// the call is redelivered after a backoff delay, until `max_attempts`
/// executions have failed. The exhausted call is then recorded as a fatal
/// failure and surfaced at the workflow call site.
///
/// # Backoff Calculation
///
/// The delay after failed attempt N is `min(base_delay * 2^(N-1), max_delay)`,
/// unless the step supplied its own `retry_after`.
///
/// With defaults (base=1s, max=60s, 3 attempts):
/// - Attempt 1 fails: retry after 1s
/// - Attempt 2 fails: retry after 2s
/// - Attempt 3 fails: fatal
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use waystone::RetryPolicy;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.max_attempts, 3);
///
/// let patient = RetryPolicy {
///     max_attempts: 10,
///     base_delay: Duration::from_millis(500),
///     max_delay: Duration::from_secs(30),
/// };
/// assert_eq!(patient.backoff_duration(3), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of executions, including the first.
    ///
    /// Default: 3 (1 initial + 2 retries).
    pub max_attempts: u32,

    /// Base delay for exponential backoff. Default: 1 second.
    pub base_delay: Duration,

    /// Upper bound on the backoff delay. Default: 60 seconds.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Returns `true` if another attempt should follow the failed one.
    ///
    /// # Arguments
    ///
    /// * `attempt` - The attempt number that just failed (1-based)
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Backoff before the attempt following `attempt`.
    ///
    /// # Arguments
    ///
    /// * `attempt` - The attempt number that just failed (1-based)
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.base_delay.saturating_mul(multiplier);
        delay.min(self.max_delay)
    }
}
