//! Run aggregate implementation.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use common::{AggregateId, RunId, WaitToken};
use event_store::Version;
use serde_json::Value;

use crate::{aggregate::Aggregate, error::DomainError};

use super::{
    EmailAddress, Phase, RsvpReply, RunEvent, RunInput, RunStatus, StepKey, WorkflowResult,
    events::{RunStartedData, StepFailedData},
};

/// A suspension point the run has entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingWait {
    Timer {
        deadline: DateTime<Utc>,
        fired: bool,
    },
    Webhook {
        token: WaitToken,
        guest: EmailAddress,
        reply: Option<RsvpReply>,
    },
}

impl PendingWait {
    pub fn is_resolved(&self) -> bool {
        match self {
            PendingWait::Timer { fired, .. } => *fired,
            PendingWait::Webhook { reply, .. } => reply.is_some(),
        }
    }
}

/// A birthday card run, rebuilt from its journal.
///
/// Holds everything needed to resume: the input, the phase, the memoized
/// output of every completed step and the waits the run has entered.
#[derive(Debug, Clone, Default)]
pub struct Run {
    id: Option<AggregateId>,

    version: Version,

    run_id: Option<RunId>,

    input: Option<RunInput>,

    started_at: Option<DateTime<Utc>>,

    phase: Phase,

    /// Memoization cache.
    steps: HashMap<StepKey, Value>,

    failures: Vec<StepFailedData>,

    waits: BTreeMap<StepKey, PendingWait>,

    /// In resolution order.
    replies: Vec<RsvpReply>,

    result: Option<WorkflowResult>,

    failure: Option<(String, bool)>,
}

impl Aggregate for Run {
    type Event = RunEvent;

    fn aggregate_type() -> &'static str {
        "BirthdayCardRun"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            RunEvent::RunStarted(data) => self.apply_run_started(data),
            RunEvent::PhaseChanged(data) => {
                self.phase = data.to;
            }
            RunEvent::StepCompleted(data) => {
                self.steps.insert(data.key, data.output);
            }
            RunEvent::StepFailed(data) => {
                self.failures.push(data);
            }
            RunEvent::WaitCreated(data) => {
                self.waits.insert(
                    data.key,
                    PendingWait::Webhook {
                        token: data.token,
                        guest: data.guest,
                        reply: None,
                    },
                );
            }
            RunEvent::RsvpRecorded(data) => {
                if let Some(PendingWait::Webhook { reply, .. }) = self.waits.get_mut(&data.key)
                    && reply.is_none()
                {
                    *reply = Some(data.reply.clone());
                    self.replies.push(data.reply);
                }
            }
            RunEvent::TimerScheduled(data) => {
                self.waits.insert(
                    data.key,
                    PendingWait::Timer {
                        deadline: data.deadline,
                        fired: false,
                    },
                );
            }
            RunEvent::TimerFired(data) => {
                if let Some(PendingWait::Timer { fired, .. }) = self.waits.get_mut(&data.key) {
                    *fired = true;
                }
            }
            RunEvent::RunCompleted(data) => {
                self.phase = Phase::Completed;
                self.result = Some(data.result);
            }
            RunEvent::RunFailed(data) => {
                self.phase = Phase::Failed;
                self.failure = Some((data.reason, data.fatal));
            }
        }
    }
}

// Decisions
impl Run {
    /// Decides the event that moves the run to `next`.
    ///
    /// Returns `Ok(None)` when the run is already at or past `next`, which is
    /// what a replayed run sees for every phase it went through before.
    pub fn transition(&self, next: Phase, at: DateTime<Utc>) -> Result<Option<RunEvent>, DomainError> {
        if self.phase == next || (!next.is_terminal() && self.phase.rank() >= next.rank()) {
            return Ok(None);
        }
        if !self.phase.can_transition_to(next) {
            return Err(DomainError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        Ok(Some(RunEvent::phase_changed(self.phase, next, at)))
    }

    /// Decides the reply to record for a resolved wait.
    ///
    /// The reply is bound to the guest stored with the wait, never to the
    /// address echoed back by the callback. Returns None for unknown keys and
    /// for waits that already have a reply.
    pub fn record_reply(
        &self,
        key: &StepKey,
        decision: super::RsvpDecision,
        echoed_email: Option<String>,
    ) -> Option<RunEvent> {
        match self.waits.get(key) {
            Some(PendingWait::Webhook {
                guest, reply: None, ..
            }) => Some(RunEvent::rsvp_recorded(
                key.clone(),
                RsvpReply::new(guest.clone(), decision),
                echoed_email,
            )),
            _ => None,
        }
    }
}

// Query methods
impl Run {
    pub fn run_id(&self) -> Option<RunId> {
        self.run_id
    }

    pub fn input(&self) -> Option<&RunInput> {
        self.input.as_ref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Returns the memoized output of a step, if it completed.
    pub fn step_output(&self, key: &StepKey) -> Option<&Value> {
        self.steps.get(key)
    }

    pub fn completed_steps(&self) -> usize {
        self.steps.len()
    }

    pub fn step_failures(&self) -> &[StepFailedData] {
        &self.failures
    }

    pub fn wait(&self, key: &StepKey) -> Option<&PendingWait> {
        self.waits.get(key)
    }

    /// Returns the webhook token allocated under `key`.
    pub fn wait_token(&self, key: &StepKey) -> Option<WaitToken> {
        match self.waits.get(key) {
            Some(PendingWait::Webhook { token, .. }) => Some(*token),
            _ => None,
        }
    }

    /// Returns the deadline chosen for the timer under `key`.
    pub fn timer_deadline(&self, key: &StepKey) -> Option<DateTime<Utc>> {
        match self.waits.get(key) {
            Some(PendingWait::Timer { deadline, .. }) => Some(*deadline),
            _ => None,
        }
    }

    pub fn reply(&self, key: &StepKey) -> Option<&RsvpReply> {
        match self.waits.get(key) {
            Some(PendingWait::Webhook { reply, .. }) => reply.as_ref(),
            _ => None,
        }
    }

    /// Waits that have not been resolved yet.
    pub fn pending_waits(&self) -> impl Iterator<Item = (&StepKey, &PendingWait)> {
        self.waits.iter().filter(|(_, wait)| !wait.is_resolved())
    }

    /// Replies in the order they were recorded.
    pub fn rsvp_replies(&self) -> &[RsvpReply] {
        &self.replies
    }

    pub fn result(&self) -> Option<&WorkflowResult> {
        self.result.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn status(&self) -> RunStatus {
        match (&self.result, &self.failure) {
            (Some(result), _) => RunStatus::Completed(result.clone()),
            (None, Some((reason, fatal))) => RunStatus::Failed {
                reason: reason.clone(),
                fatal: *fatal,
            },
            (None, None) => RunStatus::Running { phase: self.phase },
        }
    }
}

// Apply helpers
impl Run {
    fn apply_run_started(&mut self, data: RunStartedData) {
        self.id = Some(data.run_id.aggregate_id());
        self.run_id = Some(data.run_id);
        self.input = Some(data.input);
        self.started_at = Some(data.started_at);
        self.phase = Phase::Created;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{ImageArtifact, RsvpDecision};
    use serde_json::json;

    fn input(guests: &[&str]) -> RunInput {
        RunInput::from_json(&json!({
            "prompt": "a beach at sunset",
            "recipientEmail": "r@x.com",
            "rsvpEmails": guests,
        }))
        .unwrap()
    }

    fn started(guests: &[&str]) -> Run {
        let mut run = Run::default();
        run.apply(RunEvent::run_started(RunId::new(), input(guests), Utc::now()));
        run
    }

    fn email(raw: &str) -> EmailAddress {
        EmailAddress::parse(raw).unwrap()
    }

    #[test]
    fn run_started_sets_identity() {
        let run_id = RunId::new();
        let mut run = Run::default();
        run.apply(RunEvent::run_started(run_id, input(&[]), Utc::now()));

        assert_eq!(run.run_id(), Some(run_id));
        assert_eq!(run.id(), Some(run_id.aggregate_id()));
        assert_eq!(run.phase(), Phase::Created);
        assert!(matches!(run.status(), RunStatus::Running { phase: Phase::Created }));
    }

    #[test]
    fn transition_emits_phase_change() {
        let run = started(&[]);
        let event = run.transition(Phase::PromptSplitting, Utc::now()).unwrap();
        match event {
            Some(RunEvent::PhaseChanged(data)) => {
                assert_eq!(data.from, Phase::Created);
                assert_eq!(data.to, Phase::PromptSplitting);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn transition_to_an_earlier_phase_is_a_replay_no_op() {
        let mut run = started(&[]);
        run.apply(RunEvent::phase_changed(Phase::Created, Phase::PromptSplitting, Utc::now()));
        run.apply(RunEvent::phase_changed(
            Phase::PromptSplitting,
            Phase::ParallelGeneration,
            Utc::now(),
        ));

        assert!(run.transition(Phase::PromptSplitting, Utc::now()).unwrap().is_none());
        assert!(run.transition(Phase::ParallelGeneration, Utc::now()).unwrap().is_none());
    }

    #[test]
    fn skipping_ahead_is_rejected() {
        let run = started(&[]);
        let err = run.transition(Phase::Notifying, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            DomainError::InvalidTransition {
                from: Phase::Created,
                to: Phase::Notifying
            }
        ));
    }

    #[test]
    fn failed_run_cannot_fail_twice() {
        let mut run = started(&[]);
        run.apply(RunEvent::run_failed("boom", false, Utc::now()));

        assert!(run.transition(Phase::Failed, Utc::now()).unwrap().is_none());
        assert!(run.transition(Phase::Completed, Utc::now()).is_err());
        assert_eq!(
            run.status(),
            RunStatus::Failed {
                reason: "boom".into(),
                fatal: false
            }
        );
    }

    #[test]
    fn step_completed_is_memoized() {
        let mut run = started(&[]);
        let key = StepKey::singleton("generate_message");
        assert!(run.step_output(&key).is_none());

        run.apply(RunEvent::step_completed(key.clone(), json!("Happy birthday"), 1));
        assert_eq!(run.step_output(&key), Some(&json!("Happy birthday")));
        assert_eq!(run.completed_steps(), 1);
    }

    #[test]
    fn replies_are_bound_to_the_invited_guest() {
        let mut run = started(&["a@x.com"]);
        let key = StepKey::new("await_rsvp", 0);
        let token = WaitToken::new();
        run.apply(RunEvent::wait_created(key.clone(), token, email("a@x.com")));
        assert_eq!(run.wait_token(&key), Some(token));

        let event = run
            .record_reply(&key, RsvpDecision::Yes, Some("mallory@evil.com".into()))
            .unwrap();
        run.apply(event);

        let reply = run.reply(&key).unwrap();
        assert_eq!(reply.email.as_str(), "a@x.com");
        assert_eq!(reply.reply, RsvpDecision::Yes);
        assert!(run.record_reply(&key, RsvpDecision::No, None).is_none());
    }

    #[test]
    fn duplicate_rsvp_events_are_ignored_on_replay() {
        let mut run = started(&["a@x.com"]);
        let key = StepKey::new("await_rsvp", 0);
        run.apply(RunEvent::wait_created(key.clone(), WaitToken::new(), email("a@x.com")));

        let reply = RsvpReply::new(email("a@x.com"), RsvpDecision::Yes);
        run.apply(RunEvent::rsvp_recorded(key.clone(), reply.clone(), None));
        run.apply(RunEvent::rsvp_recorded(key, reply, None));

        assert_eq!(run.rsvp_replies().len(), 1);
    }

    #[test]
    fn replies_keep_resolution_order() {
        let mut run = started(&["a@x.com", "b@x.com"]);
        let a = StepKey::new("await_rsvp", 0);
        let b = StepKey::new("await_rsvp", 1);
        run.apply(RunEvent::wait_created(a.clone(), WaitToken::new(), email("a@x.com")));
        run.apply(RunEvent::wait_created(b.clone(), WaitToken::new(), email("b@x.com")));
        assert_eq!(run.pending_waits().count(), 2);

        run.apply(run.record_reply(&b, RsvpDecision::No, None).unwrap());
        run.apply(run.record_reply(&a, RsvpDecision::Yes, None).unwrap());

        let order: Vec<&str> = run.rsvp_replies().iter().map(|r| r.email.as_str()).collect();
        assert_eq!(order, vec!["b@x.com", "a@x.com"]);
        assert_eq!(run.pending_waits().count(), 0);
    }

    #[test]
    fn timers_track_deadline_and_firing() {
        let mut run = started(&[]);
        let key = StepKey::singleton("sleep_until_event");
        let deadline = Utc::now();
        run.apply(RunEvent::timer_scheduled(key.clone(), deadline));
        assert_eq!(run.timer_deadline(&key), Some(deadline));
        assert!(!run.wait(&key).unwrap().is_resolved());

        run.apply(RunEvent::timer_fired(key.clone(), deadline));
        assert!(run.wait(&key).unwrap().is_resolved());
    }

    #[test]
    fn completion_records_the_result() {
        let mut run = started(&[]);
        let result = WorkflowResult {
            image: ImageArtifact::url("https://img.example/1.png"),
            text: "Happy birthday".into(),
            rsvp_replies: Vec::new(),
        };
        run.apply(RunEvent::run_completed(result.clone(), Utc::now()));

        assert!(run.is_terminal());
        assert_eq!(run.result(), Some(&result));
        assert_eq!(run.status(), RunStatus::Completed(result));
    }
}
