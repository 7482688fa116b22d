//! Per-run event journal.

use chrono::{DateTime, Utc};
use common::RunId;
use domain::{Aggregate, DomainError, Phase, Run, RunEvent, RunInput, build_envelopes, rehydrate};
use event_store::{AppendOptions, EventStore};
use tokio::sync::Mutex;

use crate::error::{Result, SagaError};

/// Append-only journal of one run.
///
/// Holds the rebuilt [`Run`] behind a lock so concurrent branches of the same
/// run append one at a time, each against the version it last saw.
pub struct RunJournal<S: EventStore> {
    store: S,
    run_id: RunId,
    run: Mutex<Run>,
}

impl<S: EventStore> RunJournal<S> {
    /// Creates the journal of a new run with its first event.
    pub async fn start(
        store: S,
        run_id: RunId,
        input: RunInput,
        started_at: DateTime<Utc>,
    ) -> Result<Self> {
        let journal = Self {
            store,
            run_id,
            run: Mutex::new(Run::default()),
        };
        journal
            .record(RunEvent::run_started(run_id, input, started_at))
            .await?;
        Ok(journal)
    }

    /// Rebuilds the journal of an existing run. None when the run is unknown.
    pub async fn open(store: S, run_id: RunId) -> Result<Option<Self>> {
        let events = store.get_events_for_aggregate(run_id.aggregate_id()).await?;
        let Some(run) = rehydrate::<Run>(events)? else {
            return Ok(None);
        };
        Ok(Some(Self {
            store,
            run_id,
            run: Mutex::new(run),
        }))
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Reads the current state under the lock.
    pub async fn read<R>(&self, f: impl FnOnce(&Run) -> R) -> R {
        let run = self.run.lock().await;
        f(&run)
    }

    pub async fn snapshot(&self) -> Run {
        self.run.lock().await.clone()
    }

    /// Appends one event and applies it.
    pub async fn record(&self, event: RunEvent) -> Result<()> {
        let mut run = self.run.lock().await;
        self.append_locked(&mut run, event).await
    }

    /// Decides against the current state and appends the outcome atomically.
    ///
    /// Returns the appended event, if the decision produced one.
    pub async fn decide<F>(&self, decide: F) -> Result<Option<RunEvent>>
    where
        F: FnOnce(&Run) -> std::result::Result<Option<RunEvent>, DomainError>,
    {
        let mut run = self.run.lock().await;
        let Some(event) = decide(&run)? else {
            return Ok(None);
        };
        self.append_locked(&mut run, event.clone()).await?;
        Ok(Some(event))
    }

    /// Moves the run to `next`. Already being there or past it is a no-op.
    pub async fn advance(&self, next: Phase, at: DateTime<Utc>) -> Result<()> {
        let event = self.decide(|run| run.transition(next, at)).await?;
        if let Some(RunEvent::PhaseChanged(change)) = event {
            tracing::info!(
                run_id = %self.run_id,
                from = %change.from,
                to = %change.to,
                "phase transition"
            );
        }
        Ok(())
    }

    /// Records the terminal failure unless the run already ended.
    pub async fn fail(&self, error: &SagaError, at: DateTime<Utc>) -> Result<bool> {
        let reason = error.to_string();
        let fatal = error.is_fatal();
        let event = self
            .decide(|run| {
                Ok((!run.is_terminal()).then(|| RunEvent::run_failed(reason, fatal, at)))
            })
            .await?;
        Ok(event.is_some())
    }

    async fn append_locked(&self, run: &mut Run, event: RunEvent) -> Result<()> {
        let current = run.version();
        let envelopes =
            build_envelopes::<Run>(self.run_id.aggregate_id(), current, std::slice::from_ref(&event))?;
        let new_version = self
            .store
            .append(envelopes, AppendOptions::expect_version(current))
            .await
            .map_err(SagaError::from)?;
        run.apply(event);
        run.set_version(new_version);
        Ok(())
    }
}
