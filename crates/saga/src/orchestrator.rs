//! Saga orchestrator for the birthday card workflow.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use common::{RunId, WaitToken};
use domain::{
    EmailAddress, ImageArtifact, Phase, RsvpDecision, RsvpPayload, Run, RunEvent, RunInput,
    RunStatus, StepKey, WorkflowResult, rehydrate,
};
use event_store::{EventEnvelope, EventStore};
use futures_util::StreamExt;
use futures_util::future::join_all;
use futures_util::stream::FuturesUnordered;
use tokio::task::JoinHandle;

use crate::birthday_card::{
    self, PromptParts, STEP_GENERATE_IMAGE, STEP_GENERATE_MESSAGE, STEP_NOTIFY_RECIPIENT,
    STEP_REQUEST_RSVP, STEP_SPLIT_PROMPT, TIMER_EVENT, TIMER_RSVP_DEADLINE, WAIT_RSVP,
};
use crate::clock::Clock;
use crate::config::{RsvpWaitPolicy, SagaConfig};
use crate::error::{Result, SagaError};
use crate::journal::RunJournal;
use crate::services::{DeliveryReceipt, ImageGenerator, Mailer, StepError, TextGenerator};
use crate::step::StepRunner;
use crate::timer::{TimerService, TimerSpec};
use crate::webhook::WebhookGateway;

/// A run executing in the background.
#[derive(Debug)]
pub struct RunHandle {
    run_id: RunId,
    task: JoinHandle<Result<WorkflowResult>>,
}

impl RunHandle {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Waits for the run to reach a terminal phase.
    pub async fn wait(self) -> Result<WorkflowResult> {
        self.task.await?
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the task at its next suspension point. The journal keeps
    /// everything recorded so far and the run can be resumed.
    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Drives birthday card runs.
///
/// Every run is replayed from the top of the saga on each (re)start. Steps
/// whose output is in the journal return it without being invoked, waits and
/// timers reuse their recorded tokens and deadlines, so a resumed run picks up
/// exactly where the previous process stopped.
pub struct SagaOrchestrator<S, T, I, M, C>
where
    S: EventStore,
    C: Clock,
{
    store: S,
    text: Arc<T>,
    image: Arc<I>,
    mailer: Arc<M>,
    config: Arc<SagaConfig>,
    gateway: WebhookGateway<S>,
    steps: StepRunner,
    timers: TimerService<C>,
}

impl<S, T, I, M, C> Clone for SagaOrchestrator<S, T, I, M, C>
where
    S: EventStore + Clone,
    C: Clock + Clone,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            text: Arc::clone(&self.text),
            image: Arc::clone(&self.image),
            mailer: Arc::clone(&self.mailer),
            config: Arc::clone(&self.config),
            gateway: self.gateway.clone(),
            steps: self.steps.clone(),
            timers: self.timers.clone(),
        }
    }
}

impl<S, T, I, M, C> SagaOrchestrator<S, T, I, M, C>
where
    S: EventStore + Clone + 'static,
    T: TextGenerator,
    I: ImageGenerator,
    M: Mailer,
    C: Clock + Clone,
{
    pub fn new(store: S, text: T, image: I, mailer: M, clock: C, config: SagaConfig) -> Self {
        let gateway = WebhookGateway::new(
            store.clone(),
            config.webhook_base_url.clone(),
            config.wait_poll_interval,
        );
        Self {
            store,
            text: Arc::new(text),
            image: Arc::new(image),
            mailer: Arc::new(mailer),
            steps: StepRunner::new(config.retry.clone()),
            timers: TimerService::new(clock),
            config: Arc::new(config),
            gateway,
        }
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        self.timers.clock()
    }

    fn now(&self) -> DateTime<Utc> {
        self.timers.clock().now()
    }

    /// Records a new run and starts driving it in the background.
    #[tracing::instrument(skip_all, fields(guests = input.rsvp_emails.len()))]
    pub async fn start(&self, input: RunInput) -> Result<RunHandle> {
        let run_id = RunId::new();
        let journal = RunJournal::start(self.store.clone(), run_id, input, self.now()).await?;
        metrics::counter!("saga_runs_started_total").increment(1);
        tracing::info!(%run_id, "run started");
        Ok(self.spawn(journal))
    }

    /// Starts a run and waits for its result.
    ///
    /// Only allowed for runs without guests, whose duration is bounded by
    /// generation plus one sleep.
    pub async fn run_blocking(&self, input: RunInput) -> Result<WorkflowResult> {
        if input.has_guests() {
            return Err(SagaError::BlockingWaitNotAllowed);
        }
        self.start(input).await?.wait().await
    }

    /// Re-drives a run from its journal. None when the run already ended.
    #[tracing::instrument(skip(self))]
    pub async fn resume(&self, run_id: RunId) -> Result<Option<RunHandle>> {
        let journal = RunJournal::open(self.store.clone(), run_id)
            .await?
            .ok_or(SagaError::RunNotFound(run_id))?;
        if journal.read(|run| run.is_terminal()).await {
            return Ok(None);
        }
        tracing::info!("resuming run");
        Ok(Some(self.spawn(journal)))
    }

    /// Re-drives every run that has not reached a terminal phase.
    pub async fn resume_incomplete(&self) -> Result<Vec<RunHandle>> {
        let started = self.store.get_events_by_type("RunStarted").await?;
        let mut handles = Vec::new();
        for envelope in started {
            let run_id = RunId::from(envelope.aggregate_id);
            if let Some(handle) = self.resume(run_id).await? {
                handles.push(handle);
            }
        }
        tracing::info!(resumed = handles.len(), "incomplete runs resumed");
        Ok(handles)
    }

    /// Non-blocking result poll.
    pub async fn get_status(&self, run_id: RunId) -> Result<RunStatus> {
        let run = self
            .get_run(run_id)
            .await?
            .ok_or(SagaError::RunNotFound(run_id))?;
        Ok(run.status())
    }

    pub async fn get_run(&self, run_id: RunId) -> Result<Option<Run>> {
        let events = self
            .store
            .get_events_for_aggregate(run_id.aggregate_id())
            .await?;
        Ok(rehydrate::<Run>(events)?)
    }

    /// The raw journal of a run, oldest first.
    pub async fn run_events(&self, run_id: RunId) -> Result<Vec<EventEnvelope>> {
        let events = self
            .store
            .get_events_for_aggregate(run_id.aggregate_id())
            .await?;
        if events.is_empty() {
            return Err(SagaError::RunNotFound(run_id));
        }
        Ok(events)
    }

    /// Delivers an RSVP click. Unknown and already-resolved tokens are ignored.
    pub async fn resolve_rsvp(&self, token: WaitToken, payload: RsvpPayload) -> Result<bool> {
        self.gateway.resolve(token, payload, self.now()).await
    }

    fn spawn(&self, journal: RunJournal<S>) -> RunHandle {
        let run_id = journal.run_id();
        let this = self.clone();
        let task = tokio::spawn(async move { this.drive(journal).await });
        RunHandle { run_id, task }
    }

    async fn drive(&self, journal: RunJournal<S>) -> Result<WorkflowResult> {
        let run_id = journal.run_id();
        let started = Instant::now();

        let outcome = match self.execute(&journal).await {
            Ok(result) => self.complete(&journal, result).await,
            Err(error) => Err(error),
        };

        match &outcome {
            Ok(_) => {
                metrics::counter!("saga_runs_completed_total").increment(1);
                tracing::info!(%run_id, "run completed");
            }
            Err(error) => {
                let from = journal.read(|run| run.phase()).await;
                match journal.fail(error, self.now()).await {
                    Ok(true) => tracing::info!(
                        %run_id,
                        from = %from,
                        to = %Phase::Failed,
                        "phase transition"
                    ),
                    Ok(false) => {}
                    Err(record_error) => tracing::error!(
                        %run_id,
                        error = %record_error,
                        "failed to record run failure"
                    ),
                }
                metrics::counter!("saga_runs_failed_total").increment(1);
                tracing::error!(%run_id, kind = ?error.kind(), error = %error, "run failed");
            }
        }
        metrics::histogram!("saga_duration_seconds").record(started.elapsed().as_secs_f64());
        outcome
    }

    async fn complete(
        &self,
        journal: &RunJournal<S>,
        result: WorkflowResult,
    ) -> Result<WorkflowResult> {
        let now = self.now();
        let from = journal.read(|run| run.phase()).await;
        let recorded = journal
            .decide(|run| {
                Ok((!run.is_terminal()).then(|| RunEvent::run_completed(result.clone(), now)))
            })
            .await?;
        if recorded.is_some() {
            tracing::info!(
                run_id = %journal.run_id(),
                from = %from,
                to = %Phase::Completed,
                "phase transition"
            );
        }
        Ok(result)
    }

    /// The saga itself.
    #[tracing::instrument(skip_all, fields(run_id = %journal.run_id()))]
    async fn execute(&self, journal: &RunJournal<S>) -> Result<WorkflowResult> {
        let (input, started_at) = journal
            .read(|run| run.input().cloned().zip(run.started_at()))
            .await
            .ok_or_else(|| SagaError::Internal("run journal has no start event".to_string()))?;

        journal.advance(Phase::PromptSplitting, self.now()).await?;
        let parts = self.split_prompt(journal, &input.prompt).await?;

        journal.advance(Phase::ParallelGeneration, self.now()).await?;
        let (image, text) = self.generate(journal, &parts).await?;

        if input.has_guests() {
            journal.advance(Phase::AwaitingRsvp, self.now()).await?;
            self.collect_rsvps(journal, &input, &text).await?;
        }

        journal.advance(Phase::Sleeping, self.now()).await?;
        let deadline = birthday_card::card_deadline(&input, started_at, self.config.card_delay)?;
        self.timers
            .sleep(journal, &StepKey::singleton(TIMER_EVENT), TimerSpec::At(deadline))
            .await?;

        journal.advance(Phase::Notifying, self.now()).await?;
        let result = WorkflowResult {
            image,
            text,
            rsvp_replies: journal.read(|run| run.rsvp_replies().to_vec()).await,
        };
        let receipt = self.notify_recipient(journal, &input.recipient_email, &result).await?;
        tracing::info!(message_id = %receipt.message_id, "card delivered");

        Ok(result)
    }

    async fn split_prompt(&self, journal: &RunJournal<S>, prompt: &str) -> Result<PromptParts> {
        let request = &birthday_card::split_request(prompt);
        let text = &self.text;
        self.steps
            .invoke(journal, StepKey::singleton(STEP_SPLIT_PROMPT), |_| async move {
                let reply = text.generate_text(request).await?;
                let parts = PromptParts::parse(&reply).unwrap_or_else(|| {
                    tracing::warn!("prompt split unusable, using the original prompt for both");
                    PromptParts::fallback(prompt)
                });
                Ok::<_, StepError>(parts)
            })
            .await
    }

    /// Generates image and text concurrently. Both branches run to completion
    /// even when one of them fails.
    async fn generate(
        &self,
        journal: &RunJournal<S>,
        parts: &PromptParts,
    ) -> Result<(ImageArtifact, String)> {
        let image_prompt = parts.image_prompt.as_str();
        let message_request = &birthday_card::message_request(&parts.text_prompt);
        let (image_provider, text_provider) = (&self.image, &self.text);

        let image = self
            .steps
            .invoke(journal, StepKey::singleton(STEP_GENERATE_IMAGE), |_| async move {
                let image = image_provider.generate_image(image_prompt).await?;
                if image.is_empty() {
                    return Err(StepError::InvalidOutput("empty image".to_string()));
                }
                Ok::<_, StepError>(image)
            });
        let text = self
            .steps
            .invoke(journal, StepKey::singleton(STEP_GENERATE_MESSAGE), |_| async move {
                let text = text_provider.generate_text(message_request).await?;
                if text.trim().is_empty() {
                    return Err(StepError::InvalidOutput("empty card text".to_string()));
                }
                Ok::<_, StepError>(text)
            });

        let (image, text) = tokio::join!(image, text);
        Ok((image?, text?))
    }

    /// Fans out one wait and one invitation per guest, then fans the replies back in.
    async fn collect_rsvps(
        &self,
        journal: &RunJournal<S>,
        input: &RunInput,
        card_text: &str,
    ) -> Result<()> {
        // Every wait exists before the first invitation goes out
        let mut waits = Vec::with_capacity(input.rsvp_emails.len());
        for (ordinal, guest) in input.guests() {
            let key = StepKey::new(WAIT_RSVP, ordinal);
            let token = match journal.read(|run| run.wait_token(&key)).await {
                Some(token) => token,
                None => {
                    let handle = self.gateway.create_wait(journal.run_id(), self.now()).await?;
                    journal
                        .record(RunEvent::wait_created(key.clone(), handle.token, guest.clone()))
                        .await?;
                    handle.token
                }
            };
            waits.push((key, token, guest));
        }

        let invitations = waits.iter().map(|(key, token, guest)| {
            self.request_rsvp(journal, key.ordinal, *token, guest, card_text)
        });
        for outcome in join_all(invitations).await {
            outcome?;
        }

        let mut replies: FuturesUnordered<_> = waits
            .iter()
            .map(|(key, token, _)| async move { (key, self.gateway.wait(*token).await) })
            .collect();

        let cutoff_key = StepKey::singleton(TIMER_RSVP_DEADLINE);
        let cutoff = async {
            match self.config.rsvp_wait {
                RsvpWaitPolicy::Bounded(limit) => self
                    .timers
                    .sleep(journal, &cutoff_key, TimerSpec::After(limit))
                    .await
                    .map(|_| ()),
                RsvpWaitPolicy::Unbounded => std::future::pending::<Result<()>>().await,
            }
        };
        tokio::pin!(cutoff);

        loop {
            tokio::select! {
                biased;

                next = replies.next() => match next {
                    Some((key, payload)) => self.record_rsvp(journal, key, payload?).await?,
                    None => break,
                },
                fired = &mut cutoff => {
                    fired?;
                    let unanswered: Vec<StepKey> = journal
                        .read(|run| {
                            waits
                                .iter()
                                .filter(|(key, ..)| run.reply(key).is_none())
                                .map(|(key, ..)| key.clone())
                                .collect()
                        })
                        .await;
                    tracing::warn!(
                        unanswered = unanswered.len(),
                        "RSVP wait bound reached, recording silent guests as no-response"
                    );
                    for key in &unanswered {
                        self.record_rsvp(journal, key, RsvpPayload::default()).await?;
                    }
                    break;
                }
            }
        }
        Ok(())
    }

    async fn request_rsvp(
        &self,
        journal: &RunJournal<S>,
        ordinal: u32,
        token: WaitToken,
        guest: &EmailAddress,
        card_text: &str,
    ) -> Result<DeliveryReceipt> {
        let yes = self.gateway.reply_url(token, RsvpDecision::Yes, guest.as_str())?;
        let no = self.gateway.reply_url(token, RsvpDecision::No, guest.as_str())?;
        let message = &birthday_card::invitation_email(guest, card_text, yes.as_str(), no.as_str());
        let mailer = &self.mailer;
        self.steps
            .invoke(journal, StepKey::new(STEP_REQUEST_RSVP, ordinal), |_| async move {
                Ok::<_, StepError>(mailer.send(message.clone()).await?)
            })
            .await
    }

    async fn record_rsvp(
        &self,
        journal: &RunJournal<S>,
        key: &StepKey,
        payload: RsvpPayload,
    ) -> Result<()> {
        let recorded = journal
            .decide(|run| Ok(run.record_reply(key, payload.reply, payload.email)))
            .await?;
        if let Some(RunEvent::RsvpRecorded(data)) = recorded {
            if let Some(echoed) = &data.echoed_email
                && !echoed.eq_ignore_ascii_case(data.reply.email.as_str())
            {
                tracing::warn!(
                    guest = %data.reply.email,
                    echoed = %echoed,
                    "RSVP link echoed a different address, keeping the invited guest"
                );
            }
            tracing::info!(guest = %data.reply.email, reply = %data.reply.reply, "RSVP recorded");
        }
        Ok(())
    }

    async fn notify_recipient(
        &self,
        journal: &RunJournal<S>,
        recipient: &EmailAddress,
        result: &WorkflowResult,
    ) -> Result<DeliveryReceipt> {
        let message = &birthday_card::card_email(recipient, result);
        let mailer = &self.mailer;
        self.steps
            .invoke(journal, StepKey::singleton(STEP_NOTIFY_RECIPIENT), |_| async move {
                Ok::<_, StepError>(mailer.send(message.clone()).await?)
            })
            .await
    }
}
