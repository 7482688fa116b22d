//! Entry gateway: validates a request and starts a run.

use common::RunId;
use domain::{RunInput, WorkflowResult};
use event_store::EventStore;
use serde_json::Value;

use crate::clock::Clock;
use crate::error::Result;
use crate::orchestrator::SagaOrchestrator;
use crate::services::{ImageGenerator, Mailer, TextGenerator};

/// What the caller gets back from [`EntryGateway::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The run had no guests and was awaited to the end.
    Completed(WorkflowResult),
    /// The run waits on guests; poll it by id.
    Started(RunId),
}

/// Front door of the saga.
///
/// Runs without guests finish in bounded time and are awaited. Runs with
/// guests can take days, so they are detached and only their id is returned.
pub struct EntryGateway<S, T, I, M, C>
where
    S: EventStore,
    C: Clock,
{
    orchestrator: SagaOrchestrator<S, T, I, M, C>,
}

impl<S, T, I, M, C> EntryGateway<S, T, I, M, C>
where
    S: EventStore + Clone + 'static,
    T: TextGenerator,
    I: ImageGenerator,
    M: Mailer,
    C: Clock + Clone,
{
    pub fn new(orchestrator: SagaOrchestrator<S, T, I, M, C>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &SagaOrchestrator<S, T, I, M, C> {
        &self.orchestrator
    }

    /// Validates `body` and starts a run. Invalid input never creates a run.
    #[tracing::instrument(skip_all)]
    pub async fn start(&self, body: &Value) -> Result<StartOutcome> {
        let input = RunInput::from_json(body)?;

        if input.has_guests() {
            let handle = self.orchestrator.start(input).await?;
            return Ok(StartOutcome::Started(handle.run_id()));
        }

        let result = self.orchestrator.run_blocking(input).await?;
        Ok(StartOutcome::Completed(result))
    }
}
