//! Run journal events.

use chrono::{DateTime, Utc};
use common::{RunId, WaitToken};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aggregate::DomainEvent;

use super::{EmailAddress, Phase, RsvpReply, RunInput, StepKey, WorkflowResult};

/// Events recorded in a run's journal.
///
/// Together they are the run's only durable state: replaying them rebuilds
/// the phase, the step memoization cache and the pending waits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RunEvent {
    /// The run was accepted with validated input.
    RunStarted(RunStartedData),

    /// The run moved along its state machine.
    PhaseChanged(PhaseChangedData),

    /// A step succeeded; its output is the memoized result for the key.
    StepCompleted(StepCompletedData),

    /// A step exhausted its retries or failed fatally.
    StepFailed(StepFailedData),

    /// A webhook wait was allocated for a guest.
    WaitCreated(WaitCreatedData),

    /// A guest's reply was taken into the result.
    RsvpRecorded(RsvpRecordedData),

    /// A timer deadline was chosen.
    TimerScheduled(TimerScheduledData),

    /// A timer deadline was reached.
    TimerFired(TimerFiredData),

    /// The card was delivered.
    RunCompleted(RunCompletedData),

    /// The run ended without a card.
    RunFailed(RunFailedData),
}

impl DomainEvent for RunEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RunEvent::RunStarted(_) => "RunStarted",
            RunEvent::PhaseChanged(_) => "PhaseChanged",
            RunEvent::StepCompleted(_) => "StepCompleted",
            RunEvent::StepFailed(_) => "StepFailed",
            RunEvent::WaitCreated(_) => "WaitCreated",
            RunEvent::RsvpRecorded(_) => "RsvpRecorded",
            RunEvent::TimerScheduled(_) => "TimerScheduled",
            RunEvent::TimerFired(_) => "TimerFired",
            RunEvent::RunCompleted(_) => "RunCompleted",
            RunEvent::RunFailed(_) => "RunFailed",
        }
    }
}

/// Data for RunStarted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStartedData {
    pub run_id: RunId,
    pub input: RunInput,
    pub started_at: DateTime<Utc>,
}

/// Data for PhaseChanged event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseChangedData {
    pub from: Phase,
    pub to: Phase,
    pub at: DateTime<Utc>,
}

/// Data for StepCompleted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepCompletedData {
    pub key: StepKey,
    pub output: Value,
    /// Attempts it took, including the successful one.
    pub attempts: u32,
}

/// Data for StepFailed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFailedData {
    pub key: StepKey,
    pub error: String,
    pub attempts: u32,
    pub fatal: bool,
}

/// Data for WaitCreated event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitCreatedData {
    pub key: StepKey,
    pub token: WaitToken,
    /// The invited guest. Replies are attributed to this address.
    pub guest: EmailAddress,
}

/// Data for RsvpRecorded event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RsvpRecordedData {
    pub key: StepKey,
    pub reply: RsvpReply,
    /// The `email` query value sent back with the click, kept for audit only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub echoed_email: Option<String>,
}

/// Data for TimerScheduled event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerScheduledData {
    pub key: StepKey,
    pub deadline: DateTime<Utc>,
}

/// Data for TimerFired event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerFiredData {
    pub key: StepKey,
    pub fired_at: DateTime<Utc>,
}

/// Data for RunCompleted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCompletedData {
    pub result: WorkflowResult,
    pub completed_at: DateTime<Utc>,
}

/// Data for RunFailed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunFailedData {
    pub reason: String,
    pub fatal: bool,
    pub failed_at: DateTime<Utc>,
}

// Convenience constructors
impl RunEvent {
    pub fn run_started(run_id: RunId, input: RunInput, started_at: DateTime<Utc>) -> Self {
        RunEvent::RunStarted(RunStartedData {
            run_id,
            input,
            started_at,
        })
    }

    pub fn phase_changed(from: Phase, to: Phase, at: DateTime<Utc>) -> Self {
        RunEvent::PhaseChanged(PhaseChangedData { from, to, at })
    }

    pub fn step_completed(key: StepKey, output: Value, attempts: u32) -> Self {
        RunEvent::StepCompleted(StepCompletedData {
            key,
            output,
            attempts,
        })
    }

    pub fn step_failed(key: StepKey, error: impl Into<String>, attempts: u32, fatal: bool) -> Self {
        RunEvent::StepFailed(StepFailedData {
            key,
            error: error.into(),
            attempts,
            fatal,
        })
    }

    pub fn wait_created(key: StepKey, token: WaitToken, guest: EmailAddress) -> Self {
        RunEvent::WaitCreated(WaitCreatedData { key, token, guest })
    }

    pub fn rsvp_recorded(key: StepKey, reply: RsvpReply, echoed_email: Option<String>) -> Self {
        RunEvent::RsvpRecorded(RsvpRecordedData {
            key,
            reply,
            echoed_email,
        })
    }

    pub fn timer_scheduled(key: StepKey, deadline: DateTime<Utc>) -> Self {
        RunEvent::TimerScheduled(TimerScheduledData { key, deadline })
    }

    pub fn timer_fired(key: StepKey, fired_at: DateTime<Utc>) -> Self {
        RunEvent::TimerFired(TimerFiredData { key, fired_at })
    }

    pub fn run_completed(result: WorkflowResult, completed_at: DateTime<Utc>) -> Self {
        RunEvent::RunCompleted(RunCompletedData {
            result,
            completed_at,
        })
    }

    pub fn run_failed(reason: impl Into<String>, fatal: bool, failed_at: DateTime<Utc>) -> Self {
        RunEvent::RunFailed(RunFailedData {
            reason: reason.into(),
            fatal,
            failed_at,
        })
    }
}
