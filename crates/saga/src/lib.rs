//! Durable birthday card saga.
//!
//! A run splits the user's prompt, generates a card image and message in
//! parallel, optionally invites guests and waits for their RSVP clicks, sleeps
//! until the event and finally mails the card to the recipient:
//!
//! ```text
//! prompt ─► split_prompt ─► { generate_image ∥ generate_message }
//!        ─► (guests) request_rsvp × N ─► await_rsvp × N
//!        ─► sleep_until_event ─► notify_recipient ─► result
//! ```
//!
//! Every step, wait and timer is recorded in the run's event-sourced journal,
//! so a run interrupted at any point resumes without redoing completed work.

pub mod birthday_card;
pub mod clock;
pub mod config;
pub mod entry;
pub mod error;
pub mod journal;
pub mod orchestrator;
pub mod retry;
pub mod services;
pub mod step;
pub mod timer;
pub mod webhook;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RsvpWaitPolicy, SagaConfig};
pub use entry::{EntryGateway, StartOutcome};
pub use error::{ErrorKind, SagaError};
pub use journal::RunJournal;
pub use orchestrator::{RunHandle, SagaOrchestrator};
pub use retry::RetryPolicy;
pub use services::{
    Attachment, DeliveryError, DeliveryReceipt, EmailMessage, GenerationError, ImageGenerator,
    InMemoryImageGenerator, InMemoryMailer, InMemoryTextGenerator, Mailer, StepError,
    TextGenerator,
};
pub use step::StepRunner;
pub use timer::{TimerService, TimerSpec};
pub use webhook::{WaitHandle, WebhookGateway};
