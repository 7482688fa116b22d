//! Domain layer for the birthday card saga.
//!
//! This crate provides:
//! - Aggregate and DomainEvent traits for event-sourced entities
//! - CommandHandler for load/decide/append against an event store
//! - The `Run` aggregate: input, phase state machine, step memoization cache,
//!   pending waits and the terminal result of one birthday card run
//! - The `RsvpWait` aggregate backing each webhook wait

pub mod aggregate;
pub mod command;
pub mod error;
pub mod run;
pub mod wait;

pub use aggregate::{Aggregate, DomainEvent, rehydrate};
pub use command::{CommandHandler, CommandResult, build_envelopes};
pub use error::{DomainError, ValidationError};
pub use run::{
    EmailAddress, EventDate, ImageArtifact, PendingWait, Phase, RsvpDecision, RsvpReply, Run,
    RunEvent, RunInput, RunStatus, StepKey, WorkflowResult,
};
pub use wait::{RsvpPayload, RsvpWait, WaitEvent};
