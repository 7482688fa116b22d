//! E-mail delivery.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use domain::{EmailAddress, ImageArtifact};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by the mail provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("Mail provider unavailable: {0}")]
    Unavailable(String),

    /// The provider will never accept mail for this address.
    #[error("Recipient rejected: {0}")]
    InvalidRecipient(String),
}

impl DeliveryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Unavailable(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content: ImageArtifact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: EmailAddress,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

/// Proof of hand-off to the mail provider. This is the memoized step output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    pub message_id: String,
}

#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn send(&self, message: EmailMessage) -> Result<DeliveryReceipt, DeliveryError>;
}

#[derive(Debug, Default)]
struct InMemoryMailerState {
    sent: Vec<EmailMessage>,
    attempts: usize,
    fail_next: u32,
    rejected: Vec<EmailAddress>,
}

/// Mailer that keeps every delivered message in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMailer {
    state: Arc<Mutex<InMemoryMailerState>>,
}

impl InMemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryMailerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The next `n` sends fail with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.state().fail_next = n;
    }

    /// Mail to `address` is refused permanently.
    pub fn reject_recipient(&self, address: EmailAddress) {
        self.state().rejected.push(address);
    }

    /// Number of delivered messages.
    pub fn sent_count(&self) -> usize {
        self.state().sent.len()
    }

    /// Number of send calls, failed ones included.
    pub fn attempt_count(&self) -> usize {
        self.state().attempts
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.state().sent.clone()
    }

    pub fn messages_to(&self, address: &str) -> Vec<EmailMessage> {
        self.state()
            .sent
            .iter()
            .filter(|m| m.to.as_str() == address)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Mailer for InMemoryMailer {
    async fn send(&self, message: EmailMessage) -> Result<DeliveryReceipt, DeliveryError> {
        let mut state = self.state();
        state.attempts += 1;

        if state.rejected.contains(&message.to) {
            return Err(DeliveryError::InvalidRecipient(message.to.to_string()));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(DeliveryError::Unavailable("injected failure".to_string()));
        }

        state.sent.push(message);
        Ok(DeliveryReceipt {
            message_id: format!("MSG-{:04}", state.sent.len()),
        })
    }
}
