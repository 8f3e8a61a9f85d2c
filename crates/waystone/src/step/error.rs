//! Failure classification for step functions.

use std::time::Duration;

use thiserror::Error;

/// Error returned by a step function.
///
/// The classification decides what the runtime does next:
///
/// | Variant | Meaning |
/// |---------|---------|
/// | `Retryable` | Redeliver after backoff until the retry budget is spent |
/// | `Fatal` | Record the failure now; the workflow sees [`Error::StepFailed`](crate::Error::StepFailed) |
///
/// Any [`anyhow::Error`] converts into `Retryable`, so `?` inside a step body
/// treats unexpected failures as transient. Decoding errors are `Fatal`, since
/// the same input will never decode on a later attempt.
#[derive(Debug, Clone, Error)]
pub enum StepError {
    /// Transient failure. `retry_after` overrides the policy's backoff.
    #[error("{message}")]
    Retryable {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Permanent failure; never retried.
    #[error("{message}")]
    Fatal { message: String },
}

impl StepError {
    pub fn retryable(message: impl Into<String>) -> Self {
        StepError::Retryable {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Retryable failure with an explicit redelivery delay.
    pub fn retry_after(message: impl Into<String>, delay: Duration) -> Self {
        StepError::Retryable {
            message: message.into(),
            retry_after: Some(delay),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        StepError::Fatal {
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, StepError::Fatal { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            StepError::Retryable { message, .. } | StepError::Fatal { message } => message,
        }
    }
}

impl From<anyhow::Error> for StepError {
    fn from(err: anyhow::Error) -> Self {
        StepError::retryable(format!("{err:#}"))
    }
}

impl From<serde_json::Error> for StepError {
    fn from(err: serde_json::Error) -> Self {
        StepError::fatal(format!("serialization error: {err}"))
    }
}

impl From<crate::Error> for StepError {
    fn from(err: crate::Error) -> Self {
        match err {
            crate::Error::Serialization(_)
            | crate::Error::MissingClosureVar(_)
            | crate::Error::Fatal(_) => StepError::fatal(err.to_string()),
            other => StepError::retryable(other.to_string()),
        }
    }
}
