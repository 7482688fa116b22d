//! Run outputs.

use serde::{Deserialize, Serialize};

use super::{EmailAddress, ImageArtifact, Phase, RsvpDecision};

/// One guest's answer, bound to the address the invitation was sent to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RsvpReply {
    pub email: EmailAddress,
    pub reply: RsvpDecision,
}

impl RsvpReply {
    pub fn new(email: EmailAddress, reply: RsvpDecision) -> Self {
        Self { email, reply }
    }
}

/// The terminal output of a successful run. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResult {
    pub image: ImageArtifact,
    pub text: String,
    /// Replies in the order they were resolved, not the order guests were invited.
    pub rsvp_replies: Vec<RsvpReply>,
}

/// Non-blocking view of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Running { phase: Phase },
    Completed(WorkflowResult),
    Failed { reason: String, fatal: bool },
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running { .. })
    }
}
