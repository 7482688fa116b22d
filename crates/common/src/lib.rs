//! Shared identifier types for the birthday-card saga workspace.

pub mod types;

pub use types::{AggregateId, RunId, WaitToken};
