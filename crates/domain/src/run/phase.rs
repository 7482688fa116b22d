//! Run phase state machine.

use serde::{Deserialize, Serialize};

/// The phase of a birthday card run.
///
/// Phase transitions:
/// ```text
/// Created ──► PromptSplitting ──► ParallelGeneration ──┬──► AwaitingRsvp ──┐
///                   │                     │            │                   ▼
///                   │                     │            └───────────────► Sleeping ──► Notifying ──► Completed
///                   │                     │                  │             │             │
///                   └─────────────────────┴──────────────────┴─────────────┴─────────────┴──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Created,
    PromptSplitting,
    ParallelGeneration,
    AwaitingRsvp,
    Sleeping,
    Notifying,
    /// The card was delivered (terminal state).
    Completed,
    /// A step failed permanently (terminal state).
    Failed,
}

impl Phase {
    /// Position along the forward path. Replaying a run never moves backwards.
    pub fn rank(&self) -> u8 {
        match self {
            Phase::Created => 0,
            Phase::PromptSplitting => 1,
            Phase::ParallelGeneration => 2,
            Phase::AwaitingRsvp => 3,
            Phase::Sleeping => 4,
            Phase::Notifying => 5,
            Phase::Completed | Phase::Failed => 6,
        }
    }

    /// Returns true if the state machine has an edge from `self` to `next`.
    pub fn can_transition_to(&self, next: Phase) -> bool {
        use Phase::*;
        match (self, next) {
            (Completed | Failed, _) => false,
            (_, Failed) => true,
            (Created, PromptSplitting) => true,
            (PromptSplitting, ParallelGeneration) => true,
            (ParallelGeneration, AwaitingRsvp | Sleeping) => true,
            (AwaitingRsvp, Sleeping) => true,
            (Sleeping, Notifying) => true,
            (Notifying, Completed) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Created => "created",
            Phase::PromptSplitting => "prompt_splitting",
            Phase::ParallelGeneration => "parallel_generation",
            Phase::AwaitingRsvp => "awaiting_rsvp",
            Phase::Sleeping => "sleeping",
            Phase::Notifying => "notifying",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_phase_is_created() {
        assert_eq!(Phase::default(), Phase::Created);
    }

    #[test]
    fn forward_path_is_allowed() {
        assert!(Phase::Created.can_transition_to(Phase::PromptSplitting));
        assert!(Phase::PromptSplitting.can_transition_to(Phase::ParallelGeneration));
        assert!(Phase::ParallelGeneration.can_transition_to(Phase::AwaitingRsvp));
        assert!(Phase::ParallelGeneration.can_transition_to(Phase::Sleeping));
        assert!(Phase::AwaitingRsvp.can_transition_to(Phase::Sleeping));
        assert!(Phase::Sleeping.can_transition_to(Phase::Notifying));
        assert!(Phase::Notifying.can_transition_to(Phase::Completed));
    }

    #[test]
    fn skipping_phases_is_rejected() {
        assert!(!Phase::Created.can_transition_to(Phase::Sleeping));
        assert!(!Phase::PromptSplitting.can_transition_to(Phase::Completed));
        assert!(!Phase::AwaitingRsvp.can_transition_to(Phase::Notifying));
        assert!(!Phase::Sleeping.can_transition_to(Phase::AwaitingRsvp));
    }

    #[test]
    fn any_live_phase_can_fail() {
        for phase in [
            Phase::Created,
            Phase::PromptSplitting,
            Phase::ParallelGeneration,
            Phase::AwaitingRsvp,
            Phase::Sleeping,
            Phase::Notifying,
        ] {
            assert!(phase.can_transition_to(Phase::Failed), "{phase} -> failed");
            assert!(!phase.is_terminal());
        }
    }

    #[test]
    fn terminal_phases_are_final() {
        for phase in [Phase::Completed, Phase::Failed] {
            assert!(phase.is_terminal());
            assert!(!phase.can_transition_to(Phase::Failed));
            assert!(!phase.can_transition_to(Phase::Notifying));
        }
    }

    #[test]
    fn rank_follows_the_forward_path() {
        let path = [
            Phase::Created,
            Phase::PromptSplitting,
            Phase::ParallelGeneration,
            Phase::AwaitingRsvp,
            Phase::Sleeping,
            Phase::Notifying,
            Phase::Completed,
        ];
        assert!(path.windows(2).all(|w| w[0].rank() < w[1].rank()));
        assert_eq!(Phase::Failed.rank(), Phase::Completed.rank());
    }

    #[test]
    fn serializes_as_snake_case() {
        let json = serde_json::to_value(Phase::AwaitingRsvp).unwrap();
        assert_eq!(json, serde_json::json!("awaiting_rsvp"));
        assert_eq!(Phase::AwaitingRsvp.to_string(), "awaiting_rsvp");
    }
}
