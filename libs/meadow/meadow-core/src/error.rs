//! Shared error taxonomy for both sides of Meadow (extractor and transformer).
//!
//! Every crate-local error type classifies into one of these categories so
//! job workers and plan executors can decide whether to retry, route to a
//! dead-letter store, or fail a step/plan permanently without each crate
//! re-inventing the classification.

use thiserror::Error;

/// Retry disposition for an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Never retried: surfaces to the execution record / error topic, job is ack'd.
    Permanent,
    /// Retried per step/job policy; job is left unacked until retries exhaust.
    Transient,
    /// A `429`/rate-limit response; handled by the rate-limit manager, not a
    /// generic retry loop.
    RateLimited,
}

impl ErrorCategory {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited)
    }
}

/// The shared error type for Meadow's core domain logic.
///
/// Crate-local error types (`meadow_http::HttpError`, `meadow_expr::ExprError`,
/// ...) convert into this via `From` so that code crossing crate boundaries
/// (e.g. the step executor catching an HTTP error) can classify uniformly.
#[derive(Error, Debug)]
pub enum MeadowError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("disabled: {0}")]
    Disabled(String),

    #[error("bad expression: {0}")]
    BadExpression(String),

    #[error("missing path: {0}")]
    MissingPath(String),

    #[error("mapping type mismatch: {0}")]
    MappingTypeMismatch(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("execution aborted at {step_path}: status {status_code}")]
    Aborted { step_path: String, status_code: u16 },

    #[error("max loops exceeded ({0})")]
    MaxLoopsExceeded(u32),

    #[error("request too large: {size} bytes exceeds {limit} byte limit")]
    RequestTooLarge { size: usize, limit: usize },

    #[error("response too large: exceeds {limit} byte limit")]
    ResponseTooLarge { limit: usize },

    #[error("context too large: field {field:?} would make the context exceed its limit")]
    ContextTooLarge { field: Option<String> },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("retryable status {0}")]
    RetryableStatus(u16),

    #[error("rate limit wait timed out after {0:?}")]
    RateLimitWaitTimedOut(std::time::Duration),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MeadowError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            MeadowError::NotFound(_)
            | MeadowError::Disabled(_)
            | MeadowError::BadExpression(_)
            | MeadowError::MissingPath(_)
            | MeadowError::MappingTypeMismatch(_)
            | MeadowError::ValidationFailed(_)
            | MeadowError::Aborted { .. }
            | MeadowError::MaxLoopsExceeded(_)
            | MeadowError::RequestTooLarge { .. }
            | MeadowError::ContextTooLarge { .. } => ErrorCategory::Permanent,

            MeadowError::Timeout(_)
            | MeadowError::Network(_)
            | MeadowError::ResponseTooLarge { .. }
            | MeadowError::RateLimitWaitTimedOut(_)
            | MeadowError::Internal(_) => ErrorCategory::Transient,

            MeadowError::RetryableStatus(code) if *code == 429 => ErrorCategory::RateLimited,
            MeadowError::RetryableStatus(_) => ErrorCategory::Transient,
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.category() == ErrorCategory::Permanent
    }
}
