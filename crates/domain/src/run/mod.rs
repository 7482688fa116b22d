//! Birthday card run aggregate and related types.

mod aggregate;
mod events;
mod input;
mod phase;
mod result;
mod step;
mod value_objects;

pub use aggregate::{PendingWait, Run};
pub use events::{
    PhaseChangedData, RsvpRecordedData, RunCompletedData, RunEvent, RunFailedData,
    RunStartedData, StepCompletedData, StepFailedData, TimerFiredData, TimerScheduledData,
    WaitCreatedData,
};
pub use input::RunInput;
pub use phase::Phase;
pub use result::{RsvpReply, RunStatus, WorkflowResult};
pub use step::StepKey;
pub use value_objects::{EmailAddress, EventDate, ImageArtifact, RsvpDecision};
