//! Webhook wait aggregate.
//!
//! Each wait is a two-event stream keyed by its token. The second event can
//! only be appended at version 2, so racing resolutions have exactly one winner.

mod aggregate;
mod events;
mod payload;

pub use aggregate::RsvpWait;
pub use events::{WaitEvent, WaitRegisteredData, WaitResolvedData};
pub use payload::RsvpPayload;
