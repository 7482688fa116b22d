//! Integration tests for the birthday card saga.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;

use common::{RunId, WaitToken};
use domain::{EmailAddress, Phase, RsvpDecision, RsvpPayload, RunEvent, RunInput, RunStatus};
use event_store::InMemoryEventStore;
use saga::{
    ErrorKind, InMemoryImageGenerator, InMemoryMailer, InMemoryTextGenerator, ManualClock,
    RetryPolicy, RsvpWaitPolicy, SagaConfig, SagaError, SagaOrchestrator,
};
use serde_json::json;
use url::Url;

type TestOrchestrator = SagaOrchestrator<
    InMemoryEventStore,
    InMemoryTextGenerator,
    InMemoryImageGenerator,
    InMemoryMailer,
    ManualClock,
>;

struct TestHarness {
    store: InMemoryEventStore,
    clock: ManualClock,
    config: SagaConfig,
    orchestrator: TestOrchestrator,
    text: InMemoryTextGenerator,
    image: InMemoryImageGenerator,
    mailer: InMemoryMailer,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_config(config())
    }

    fn with_config(config: SagaConfig) -> Self {
        Self::on_store(InMemoryEventStore::new(), ManualClock::default(), config)
    }

    fn on_store(store: InMemoryEventStore, clock: ManualClock, config: SagaConfig) -> Self {
        let text = InMemoryTextGenerator::new();
        let image = InMemoryImageGenerator::new();
        let mailer = InMemoryMailer::new();
        let orchestrator = SagaOrchestrator::new(
            store.clone(),
            text.clone(),
            image.clone(),
            mailer.clone(),
            clock.clone(),
            config.clone(),
        );
        Self {
            store,
            clock,
            config,
            orchestrator,
            text,
            image,
            mailer,
        }
    }

    /// Same journal and clock, fresh providers: a restarted process.
    fn restarted(&self) -> Self {
        Self::on_store(self.store.clone(), self.clock.clone(), self.config.clone())
    }

    async fn phase(&self, run_id: RunId) -> Phase {
        self.orchestrator
            .get_run(run_id)
            .await
            .unwrap()
            .unwrap()
            .phase()
    }

    async fn recorded_replies(&self, run_id: RunId) -> usize {
        self.orchestrator
            .get_run(run_id)
            .await
            .unwrap()
            .unwrap()
            .rsvp_replies()
            .len()
    }

    /// The last phase a failed run reached before it failed.
    async fn failed_in(&self, run_id: RunId) -> Phase {
        let mut phase = Phase::Created;
        for envelope in self.orchestrator.run_events(run_id).await.unwrap() {
            match serde_json::from_value::<RunEvent>(envelope.payload).unwrap() {
                RunEvent::PhaseChanged(change) if change.to != Phase::Failed => phase = change.to,
                RunEvent::RunFailed(_) => return phase,
                _ => {}
            }
        }
        panic!("run {run_id} has not failed");
    }

    /// Clicks the link a guest received in their invitation.
    async fn click(&self, guest: &str, answer: &str) -> bool {
        let (token, payload) = rsvp_link(&self.mailer, guest, answer);
        self.orchestrator.resolve_rsvp(token, payload).await.unwrap()
    }
}

fn config() -> SagaConfig {
    SagaConfig::default()
        .with_retry(RetryPolicy::immediate(3))
        .with_card_delay(Duration::ZERO)
        .with_wait_poll_interval(Duration::from_millis(50))
}

fn input(guests: &[&str]) -> RunInput {
    RunInput::from_json(&json!({
        "prompt": "a beach at sunset",
        "recipientEmail": "r@x.com",
        "rsvpEmails": guests,
    }))
    .unwrap()
}

/// Polls `condition` until it holds, failing the test after five seconds.
async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Reads the token and payload behind the "Yes"/"No" link of an invitation.
fn rsvp_link(mailer: &InMemoryMailer, guest: &str, answer: &str) -> (WaitToken, RsvpPayload) {
    let invitation = mailer
        .messages_to(guest)
        .into_iter()
        .next()
        .expect("invitation sent");
    let prefix = format!("{answer}: ");
    let link = invitation
        .body
        .lines()
        .find_map(|line| line.strip_prefix(prefix.as_str()))
        .expect("link in invitation");

    let url = Url::parse(link).unwrap();
    let token: WaitToken = url.path_segments().unwrap().last().unwrap().parse().unwrap();
    let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
    let payload = RsvpPayload::from_query(
        query.get("reply").map(String::as_str),
        query.get("email").map(String::as_str),
    );
    (token, payload)
}

async fn invitations_sent(mailer: &InMemoryMailer, guests: &[&str]) {
    eventually(|| async move { guests.iter().all(|g| !mailer.messages_to(g).is_empty()) }).await;
}

#[tokio::test]
async fn test_run_without_guests_produces_image_and_text() {
    let h = TestHarness::new();

    let result = h.orchestrator.run_blocking(input(&[])).await.unwrap();

    assert!(!result.image.is_empty());
    assert!(!result.text.is_empty());
    assert!(result.rsvp_replies.is_empty());

    let cards = h.mailer.messages_to("r@x.com");
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].attachments.len(), 1);
    assert_eq!(h.text.call_count(), 2);
    assert_eq!(h.image.call_count(), 1);
}

#[tokio::test]
async fn test_two_guests_answering_yes() {
    let h = TestHarness::new();
    let handle = h.orchestrator.start(input(&["a@x.com", "b@x.com"])).await.unwrap();
    let run_id = handle.run_id();

    invitations_sent(&h.mailer, &["a@x.com", "b@x.com"]).await;
    assert_eq!(h.phase(run_id).await, Phase::AwaitingRsvp);
    assert!(h.mailer.messages_to("r@x.com").is_empty());

    assert!(h.click("b@x.com", "Yes").await);
    assert!(h.click("a@x.com", "Yes").await);

    let result = handle.wait().await.unwrap();
    let replies: HashSet<(String, RsvpDecision)> = result
        .rsvp_replies
        .iter()
        .map(|r| (r.email.to_string(), r.reply))
        .collect();
    let expected: HashSet<(String, RsvpDecision)> = [
        ("a@x.com".to_string(), RsvpDecision::Yes),
        ("b@x.com".to_string(), RsvpDecision::Yes),
    ]
    .into_iter()
    .collect();
    assert_eq!(replies, expected);

    let status = h.orchestrator.get_status(run_id).await.unwrap();
    assert_eq!(status, RunStatus::Completed(result));
}

#[tokio::test]
async fn test_duplicate_click_is_ignored() {
    let h = TestHarness::new();
    let handle = h.orchestrator.start(input(&["a@x.com"])).await.unwrap();
    invitations_sent(&h.mailer, &["a@x.com"]).await;

    assert!(h.click("a@x.com", "Yes").await);
    assert!(!h.click("a@x.com", "Yes").await);
    assert!(!h.click("a@x.com", "No").await);

    let result = handle.wait().await.unwrap();
    assert_eq!(result.rsvp_replies.len(), 1);
    assert_eq!(result.rsvp_replies[0].reply, RsvpDecision::Yes);
}

#[tokio::test]
async fn test_unknown_token_is_a_no_op() {
    let h = TestHarness::new();
    let resolved = h
        .orchestrator
        .resolve_rsvp(WaitToken::new(), RsvpPayload::from_query(Some("yes"), None))
        .await
        .unwrap();
    assert!(!resolved);
}

#[tokio::test]
async fn test_every_guest_appears_exactly_once() {
    let guests = ["g0@x.com", "g1@x.com", "g2@x.com", "g3@x.com", "g4@x.com"];
    let h = TestHarness::new();
    let handle = h.orchestrator.start(input(&guests)).await.unwrap();
    invitations_sent(&h.mailer, &guests).await;

    for (i, guest) in guests.iter().enumerate().rev() {
        let answer = if i % 2 == 0 { "Yes" } else { "No" };
        assert!(h.click(guest, answer).await);
    }

    let result = handle.wait().await.unwrap();
    assert_eq!(result.rsvp_replies.len(), guests.len());
    let emails: HashSet<String> = result
        .rsvp_replies
        .iter()
        .map(|r| r.email.to_string())
        .collect();
    assert_eq!(emails.len(), guests.len());
    for reply in &result.rsvp_replies {
        let index = guests.iter().position(|g| *g == reply.email.as_str()).unwrap();
        let expected = if index % 2 == 0 {
            RsvpDecision::Yes
        } else {
            RsvpDecision::No
        };
        assert_eq!(reply.reply, expected);
    }

    let card = &h.mailer.messages_to("r@x.com")[0];
    assert!(card.body.contains("3 of 5 guests are coming."));
}

#[tokio::test]
async fn test_reply_is_bound_to_the_invited_guest() {
    let h = TestHarness::new();
    let handle = h.orchestrator.start(input(&["a@x.com"])).await.unwrap();
    invitations_sent(&h.mailer, &["a@x.com"]).await;

    let (token, _) = rsvp_link(&h.mailer, "a@x.com", "Yes");
    let forged = RsvpPayload::from_query(Some("yes"), Some("mallory@evil.com"));
    assert!(h.orchestrator.resolve_rsvp(token, forged).await.unwrap());

    let result = handle.wait().await.unwrap();
    assert_eq!(result.rsvp_replies[0].email.as_str(), "a@x.com");
}

#[tokio::test]
async fn test_restarted_process_does_not_repeat_completed_steps() {
    let first = TestHarness::new();
    let handle = first.orchestrator.start(input(&["a@x.com"])).await.unwrap();
    let run_id = handle.run_id();
    invitations_sent(&first.mailer, &["a@x.com"]).await;
    let (token, payload) = rsvp_link(&first.mailer, "a@x.com", "Yes");

    // Crash while waiting for the guest
    handle.abort();
    let _ = handle.wait().await;
    let text_before = first.text.call_count();

    let second = first.restarted();
    let resumed = second.orchestrator.resume(run_id).await.unwrap().unwrap();
    assert!(second.orchestrator.resolve_rsvp(token, payload).await.unwrap());
    let result = resumed.wait().await.unwrap();

    assert_eq!(second.text.call_count(), 0);
    assert_eq!(second.image.call_count(), 0);
    assert!(second.mailer.messages_to("a@x.com").is_empty());
    assert_eq!(second.mailer.messages_to("r@x.com").len(), 1);
    assert_eq!(first.text.call_count(), text_before);

    let uninterrupted = TestHarness::new();
    let reference = uninterrupted.orchestrator.start(input(&["a@x.com"])).await.unwrap();
    invitations_sent(&uninterrupted.mailer, &["a@x.com"]).await;
    assert!(uninterrupted.click("a@x.com", "Yes").await);
    let expected = reference.wait().await.unwrap();

    assert_eq!(result.text, expected.text);
    assert_eq!(result.image, expected.image);
    assert_eq!(result.rsvp_replies, expected.rsvp_replies);
}

#[tokio::test]
async fn test_resuming_a_finished_run_is_a_no_op() {
    let h = TestHarness::new();
    let handle = h.orchestrator.start(input(&[])).await.unwrap();
    let run_id = handle.run_id();
    handle.wait().await.unwrap();

    assert!(h.orchestrator.resume(run_id).await.unwrap().is_none());
    let err = h.orchestrator.resume(RunId::new()).await.unwrap_err();
    assert!(matches!(err, SagaError::RunNotFound(_)));
}

#[tokio::test]
async fn test_resume_incomplete_picks_up_only_unfinished_runs() {
    let first = TestHarness::new();
    first.orchestrator.run_blocking(input(&[])).await.unwrap();

    let a = first.orchestrator.start(input(&["a@x.com"])).await.unwrap();
    let b = first.orchestrator.start(input(&["b@x.com"])).await.unwrap();
    invitations_sent(&first.mailer, &["a@x.com", "b@x.com"]).await;
    let pending: HashSet<RunId> = [a.run_id(), b.run_id()].into_iter().collect();
    a.abort();
    b.abort();
    let _ = a.wait().await;
    let _ = b.wait().await;

    let second = first.restarted();
    let handles = second.orchestrator.resume_incomplete().await.unwrap();
    let resumed: HashSet<RunId> = handles.iter().map(|h| h.run_id()).collect();
    assert_eq!(resumed, pending);

    for guest in ["a@x.com", "b@x.com"] {
        let (token, payload) = rsvp_link(&first.mailer, guest, "No");
        assert!(second.orchestrator.resolve_rsvp(token, payload).await.unwrap());
    }
    for handle in handles {
        let result = handle.wait().await.unwrap();
        assert_eq!(result.rsvp_replies[0].reply, RsvpDecision::No);
    }
}

#[tokio::test]
async fn test_card_is_not_sent_before_the_deadline() {
    let h = &TestHarness::with_config(config().with_card_delay(Duration::from_secs(3600)));
    let handle = h.orchestrator.start(input(&[])).await.unwrap();
    let run_id = handle.run_id();

    eventually(|| async move { h.clock.sleepers() > 0 }).await;
    assert_eq!(h.phase(run_id).await, Phase::Sleeping);

    h.clock.advance(Duration::from_secs(3599));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!handle.is_finished());
    assert_eq!(h.mailer.sent_count(), 0);

    h.clock.advance(Duration::from_secs(1));
    handle.wait().await.unwrap();
    assert_eq!(h.mailer.sent_count(), 1);
}

#[tokio::test]
async fn test_event_date_sets_the_deadline() {
    let h = &TestHarness::new();
    let input = RunInput::from_json(&json!({
        "prompt": "a beach at sunset",
        "recipientEmail": "r@x.com",
        "eventDate": "2100-01-01",
    }))
    .unwrap();
    let handle = h.orchestrator.start(input).await.unwrap();

    eventually(|| async move { h.clock.sleepers() > 0 }).await;
    assert_eq!(h.mailer.sent_count(), 0);

    h.clock.set("2100-01-01T00:00:00Z".parse().unwrap());
    handle.wait().await.unwrap();
    assert_eq!(h.mailer.sent_count(), 1);
}

#[tokio::test]
async fn test_image_failure_fails_the_run_without_notifying() {
    let h = TestHarness::new();
    h.image.fail_next(10);

    let handle = h.orchestrator.start(input(&[])).await.unwrap();
    let run_id = handle.run_id();
    let err = handle.wait().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::StepExecution);
    assert!(!err.is_fatal());
    assert_eq!(h.image.call_count(), 3);
    // The sibling branch still ran to completion
    assert_eq!(h.text.call_count(), 2);
    assert_eq!(h.mailer.attempt_count(), 0);

    match h.orchestrator.get_status(run_id).await.unwrap() {
        RunStatus::Failed { reason, fatal } => {
            assert!(reason.contains("generate_image"));
            assert!(!fatal);
        }
        other => panic!("expected a failed run, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rejected_prompt_is_fatal_and_not_retried() {
    let h = TestHarness::new();
    h.image.reject_all(true);

    let err = h.orchestrator.run_blocking(input(&[])).await.unwrap_err();

    assert!(err.is_fatal());
    assert_eq!(err.kind(), ErrorKind::Fatal);
    assert_eq!(h.image.call_count(), 1);
    assert_eq!(h.mailer.attempt_count(), 0);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let h = TestHarness::new();
    h.text.fail_next(2);
    h.mailer.fail_next(1);

    let result = h.orchestrator.run_blocking(input(&[])).await.unwrap();

    assert!(!result.text.is_empty());
    assert_eq!(h.text.call_count(), 4);
    assert_eq!(h.mailer.attempt_count(), 2);
    assert_eq!(h.mailer.sent_count(), 1);
}

#[tokio::test]
async fn test_unusable_split_falls_back_to_the_prompt() {
    let h = TestHarness::new();
    h.text.reply_empty_next(1);

    let result = h.orchestrator.run_blocking(input(&[])).await.unwrap();

    assert!(!result.text.is_empty());
    let prompts = h.text.prompts();
    assert!(prompts[1].contains("a beach at sunset"));
}

#[tokio::test]
async fn test_bounded_rsvp_wait_records_silent_guests() {
    let h = &TestHarness::with_config(
        config().with_rsvp_wait(RsvpWaitPolicy::Bounded(Duration::from_secs(86_400))),
    );
    let handle = h.orchestrator.start(input(&["a@x.com", "b@x.com"])).await.unwrap();
    let run_id = handle.run_id();
    invitations_sent(&h.mailer, &["a@x.com", "b@x.com"]).await;

    assert!(h.click("a@x.com", "Yes").await);
    eventually(|| async move { h.recorded_replies(run_id).await == 1 }).await;
    eventually(|| async move { h.clock.sleepers() > 0 }).await;

    h.clock.advance(Duration::from_secs(86_400));
    let result = handle.wait().await.unwrap();

    let replies: HashMap<String, RsvpDecision> = result
        .rsvp_replies
        .iter()
        .map(|r| (r.email.to_string(), r.reply))
        .collect();
    assert_eq!(replies.len(), 2);
    assert_eq!(replies["a@x.com"], RsvpDecision::Yes);
    assert_eq!(replies["b@x.com"], RsvpDecision::NoResponse);

    // A late click is accepted by the gateway but no longer changes the run
    h.click("b@x.com", "Yes").await;
    assert_eq!(h.recorded_replies(run_id).await, 2);
}

#[tokio::test]
async fn test_blocking_wait_is_refused_for_guests() {
    let h = TestHarness::new();
    let err = h
        .orchestrator
        .run_blocking(input(&["a@x.com"]))
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::BlockingWaitNotAllowed));
    assert_eq!(h.text.call_count(), 0);
}

#[tokio::test]
async fn test_journal_is_exposed_as_an_audit_trail() {
    let h = TestHarness::new();
    let handle = h.orchestrator.start(input(&[])).await.unwrap();
    let run_id = handle.run_id();
    handle.wait().await.unwrap();

    let events = h.orchestrator.run_events(run_id).await.unwrap();
    let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(types.first(), Some(&"RunStarted"));
    assert_eq!(types.last(), Some(&"RunCompleted"));
    assert!(types.contains(&"TimerFired"));
    assert!(
        events
            .iter()
            .all(|e| e.correlation_id() == Some(run_id.to_string().as_str()))
    );
}

fn failure(status: RunStatus) -> (String, bool) {
    match status {
        RunStatus::Failed { reason, fatal } => (reason, fatal),
        other => panic!("expected a failed run, got {other:?}"),
    }
}

#[tokio::test]
async fn test_split_failure_fails_the_run_before_generation() {
    let h = TestHarness::new();
    h.text.fail_next(10);

    let handle = h.orchestrator.start(input(&[])).await.unwrap();
    let run_id = handle.run_id();
    let err = handle.wait().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::StepExecution);
    assert_eq!(h.text.call_count(), 3);
    assert_eq!(h.image.call_count(), 0);
    assert_eq!(h.mailer.attempt_count(), 0);
    assert_eq!(h.failed_in(run_id).await, Phase::PromptSplitting);

    let (reason, fatal) = failure(h.orchestrator.get_status(run_id).await.unwrap());
    assert!(reason.starts_with("Step 'split_prompt' failed after 3 attempt(s)"));
    assert!(!fatal);
}

#[tokio::test]
async fn test_undeliverable_card_fails_the_run_while_notifying() {
    let h = TestHarness::new();
    h.mailer.fail_next(10);

    let handle = h.orchestrator.start(input(&[])).await.unwrap();
    let run_id = handle.run_id();
    handle.wait().await.unwrap_err();

    assert_eq!(h.mailer.attempt_count(), 3);
    assert_eq!(h.mailer.sent_count(), 0);
    assert_eq!(h.failed_in(run_id).await, Phase::Notifying);

    let (reason, fatal) = failure(h.orchestrator.get_status(run_id).await.unwrap());
    assert!(reason.starts_with("Step 'notify_recipient' failed after 3 attempt(s)"));
    assert!(!fatal);
}

#[tokio::test]
async fn test_refused_invitation_fails_the_run_after_the_other_invitations() {
    let h = TestHarness::new();
    h.mailer
        .reject_recipient(EmailAddress::parse("b@x.com").unwrap());

    let handle = h
        .orchestrator
        .start(input(&["a@x.com", "b@x.com", "c@x.com"]))
        .await
        .unwrap();
    let run_id = handle.run_id();
    let err = handle.wait().await.unwrap_err();

    assert!(err.is_fatal());
    assert_eq!(h.mailer.messages_to("a@x.com").len(), 1);
    assert_eq!(h.mailer.messages_to("c@x.com").len(), 1);
    assert!(h.mailer.messages_to("b@x.com").is_empty());
    assert!(h.mailer.messages_to("r@x.com").is_empty());
    assert_eq!(h.failed_in(run_id).await, Phase::AwaitingRsvp);

    let (reason, fatal) = failure(h.orchestrator.get_status(run_id).await.unwrap());
    assert!(reason.contains("request_rsvp"));
    assert!(fatal);
}

#[tokio::test]
async fn test_card_delay_past_the_calendar_fails_the_run() {
    for delay in [Duration::from_secs(10_u64.pow(13)), Duration::from_secs(u64::MAX)] {
        let h = TestHarness::with_config(config().with_card_delay(delay));

        let handle = h.orchestrator.start(input(&[])).await.unwrap();
        let run_id = handle.run_id();
        let err = handle.wait().await.unwrap_err();

        assert!(matches!(err, SagaError::DelayOutOfRange(d) if d == delay));
        assert_eq!(h.mailer.attempt_count(), 0);
        assert_eq!(h.failed_in(run_id).await, Phase::Sleeping);

        let (_, fatal) = failure(h.orchestrator.get_status(run_id).await.unwrap());
        assert!(fatal);
        assert!(h.orchestrator.resume(run_id).await.unwrap().is_none());
    }
}

#[tokio::test]
async fn test_unschedulable_rsvp_bound_fails_the_run() {
    let config = config().with_rsvp_wait(RsvpWaitPolicy::Bounded(Duration::from_secs(u64::MAX)));
    let h = TestHarness::with_config(config);

    let handle = h.orchestrator.start(input(&["a@x.com"])).await.unwrap();
    let run_id = handle.run_id();
    let err = handle.wait().await.unwrap_err();

    assert!(matches!(err, SagaError::DelayOutOfRange(_)));
    assert!(h.mailer.messages_to("r@x.com").is_empty());
    assert_eq!(h.failed_in(run_id).await, Phase::AwaitingRsvp);
}
