//! Domain error types.

use event_store::EventStoreError;
use thiserror::Error;

use crate::run::Phase;

/// Malformed saga input, rejected before a run is created. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Request body must be a JSON object")]
    NotAnObject,

    #[error("Prompt is required and must be a string")]
    Prompt,

    #[error("Recipient email is required and must be a string")]
    RecipientMissing,

    #[error("Recipient email must be a valid email address")]
    RecipientInvalid(String),

    #[error("RSVP emails must be an array of strings")]
    RsvpNotAList,

    #[error("Invalid RSVP email: {0}")]
    RsvpInvalid(String),

    #[error("Event date must be an ISO-8601 date or date-time")]
    EventDate(String),
}

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The run's state machine does not allow the requested move.
    #[error("Invalid phase transition from {from} to {to}")]
    InvalidTransition { from: Phase, to: Phase },

    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
