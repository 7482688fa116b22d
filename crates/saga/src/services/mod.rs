//! External provider traits and in-memory implementations for saga steps.

pub mod email;
pub mod generation;

pub use email::{
    Attachment, DeliveryError, DeliveryReceipt, EmailMessage, InMemoryMailer, Mailer,
};
pub use generation::{
    GenerationError, ImageGenerator, InMemoryImageGenerator, InMemoryTextGenerator,
    TextGenerator,
};

use thiserror::Error;

/// Why a single step attempt failed.
#[derive(Debug, Clone, Error)]
pub enum StepError {
    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    /// The provider answered with something unusable, such as empty text.
    #[error("Invalid output: {0}")]
    InvalidOutput(String),
}

impl StepError {
    /// Transient errors are retried by the step runner; the rest fail at once.
    pub fn is_retryable(&self) -> bool {
        match self {
            StepError::Generation(e) => e.is_retryable(),
            StepError::Delivery(e) => e.is_retryable(),
            StepError::InvalidOutput(_) => true,
        }
    }
}
