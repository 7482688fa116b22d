//! Saga error types.

use common::RunId;
use domain::{DomainError, ValidationError};
use event_store::EventStoreError;
use thiserror::Error;

use crate::services::StepError;

/// How a caller should treat a saga failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input, rejected before a run exists.
    Validation,
    /// A step exhausted its retry budget on transient errors.
    StepExecution,
    /// Do not retry; the cause is actionable by the caller.
    Fatal,
    /// Anything else: storage, serialization, bugs.
    Unexpected,
}

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// A step gave up. `fatal` is set when the provider refused outright.
    #[error("Step '{step}' failed after {attempts} attempt(s): {reason}")]
    StepExecution {
        step: String,
        attempts: u32,
        reason: String,
        fatal: bool,
    },

    #[error("{0}")]
    Fatal(String),

    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    /// Blocking on a run with guests could take days.
    #[error("Cannot wait synchronously for a run with RSVP guests")]
    BlockingWaitNotAllowed,

    #[error("Domain error: {0}")]
    Domain(DomainError),

    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid webhook URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A configured delay reaches past the last representable instant.
    #[error("Delay of {}s is too long to schedule", .0.as_secs())]
    DelayOutOfRange(std::time::Duration),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SagaError {
    pub fn step(step: impl Into<String>, attempts: u32, error: &StepError) -> Self {
        SagaError::StepExecution {
            step: step.into(),
            attempts,
            reason: error.to_string(),
            fatal: !error.is_retryable(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SagaError::Validation(_) | SagaError::BlockingWaitNotAllowed => ErrorKind::Validation,
            SagaError::StepExecution { fatal: true, .. }
            | SagaError::Fatal(_)
            | SagaError::DelayOutOfRange(_) => ErrorKind::Fatal,
            SagaError::StepExecution { fatal: false, .. } => ErrorKind::StepExecution,
            SagaError::Domain(DomainError::Validation(_)) => ErrorKind::Validation,
            _ => ErrorKind::Unexpected,
        }
    }

    /// True when retrying the same request cannot succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Validation | ErrorKind::Fatal)
    }
}

impl From<DomainError> for SagaError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(e) => SagaError::Validation(e),
            DomainError::EventStore(e) => SagaError::EventStore(e),
            DomainError::Serialization(e) => SagaError::Serialization(e),
            other => SagaError::Domain(other),
        }
    }
}

impl From<tokio::task::JoinError> for SagaError {
    fn from(err: tokio::task::JoinError) -> Self {
        SagaError::Internal(format!("run task ended abnormally: {err}"))
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
