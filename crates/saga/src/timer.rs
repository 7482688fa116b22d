//! Durable timers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use domain::{PendingWait, RunEvent, StepKey};
use event_store::EventStore;

use crate::clock::Clock;
use crate::error::{Result, SagaError};
use crate::journal::RunJournal;

/// When a timer should fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerSpec {
    At(DateTime<Utc>),
    /// Relative to the moment the timer is first scheduled.
    After(Duration),
}

/// Suspends a run until a deadline.
///
/// The deadline is recorded in the run journal the first time a timer key is
/// seen, so a resumed run sleeps until the original instant rather than
/// starting the countdown over.
#[derive(Debug, Clone)]
pub struct TimerService<C: Clock> {
    clock: C,
}

/// `start + delay`, or an error when the sum leaves the calendar range.
pub fn deadline_after(start: DateTime<Utc>, delay: Duration) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| start.checked_add_signed(delay))
        .ok_or(SagaError::DelayOutOfRange(delay))
}

impl<C: Clock> TimerService<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Records the deadline for `key` unless one exists, and returns the recorded one.
    pub async fn schedule<S: EventStore>(
        &self,
        journal: &RunJournal<S>,
        key: &StepKey,
        spec: TimerSpec,
    ) -> Result<DateTime<Utc>> {
        let now = self.clock.now();
        let deadline = match spec {
            TimerSpec::At(at) => at,
            TimerSpec::After(delay) => deadline_after(now, delay)?,
        };

        journal
            .decide(|run| {
                Ok(run
                    .timer_deadline(key)
                    .is_none()
                    .then(|| RunEvent::timer_scheduled(key.clone(), deadline)))
            })
            .await?;

        let recorded = journal.read(|run| run.timer_deadline(key)).await;
        Ok(recorded.unwrap_or(deadline))
    }

    /// Schedules the timer and sleeps until it fires.
    #[tracing::instrument(skip(self, journal, spec), fields(run_id = %journal.run_id(), timer = %key))]
    pub async fn sleep<S: EventStore>(
        &self,
        journal: &RunJournal<S>,
        key: &StepKey,
        spec: TimerSpec,
    ) -> Result<DateTime<Utc>> {
        let deadline = self.schedule(journal, key, spec).await?;

        let fired = journal
            .read(|run| matches!(run.wait(key), Some(PendingWait::Timer { fired: true, .. })))
            .await;
        if fired {
            return Ok(deadline);
        }

        tracing::info!(%deadline, "sleeping until deadline");
        self.clock.sleep_until(deadline).await;

        journal
            .record(RunEvent::timer_fired(key.clone(), self.clock.now()))
            .await?;
        Ok(deadline)
    }
}
