//! Birthday card workflow endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use common::RunId;
use domain::{Phase, RunStatus, WorkflowResult};
use event_store::EventStore;
use saga::{
    EntryGateway, InMemoryImageGenerator, InMemoryMailer, InMemoryTextGenerator,
    SagaOrchestrator, StartOutcome, SystemClock,
};
use serde::Serialize;
use serde_json::Value;

use crate::error::ApiError;

pub type Orchestrator<S> = SagaOrchestrator<
    S,
    InMemoryTextGenerator,
    InMemoryImageGenerator,
    InMemoryMailer,
    SystemClock,
>;

/// Shared application state accessible from all handlers.
pub struct AppState<S: EventStore> {
    pub entry: EntryGateway<
        S,
        InMemoryTextGenerator,
        InMemoryImageGenerator,
        InMemoryMailer,
        SystemClock,
    >,
    /// Outbox of the in-memory mailer; invitations carry the RSVP links.
    pub mailer: InMemoryMailer,
}

impl<S: EventStore + Clone + 'static> AppState<S> {
    pub fn orchestrator(&self) -> &Orchestrator<S> {
        self.entry.orchestrator()
    }
}

// -- Response types --

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum StartResponse {
    Started {
        #[serde(rename = "runId")]
        run_id: String,
    },
}

/// Body of the non-blocking result poll.
#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatusResponse {
    Running { phase: Phase },
    Completed(WorkflowResult),
    Failed { error: String, fatal: bool },
}

impl From<RunStatus> for RunStatusResponse {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Running { phase } => RunStatusResponse::Running { phase },
            RunStatus::Completed(result) => RunStatusResponse::Completed(result),
            RunStatus::Failed { reason, fatal } => RunStatusResponse::Failed {
                error: reason,
                fatal,
            },
        }
    }
}

/// Response type for event envelope data.
#[derive(Serialize)]
pub struct EventEnvelopeResponse {
    pub event_id: String,
    pub event_type: String,
    pub version: i64,
    pub timestamp: String,
    pub payload: Value,
}

// -- Handlers --

/// POST /workflows/birthday-card: start a run.
///
/// Runs without guests are awaited and answered with the card itself; runs
/// with guests answer at once with their id.
#[tracing::instrument(skip_all)]
pub async fn start<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

    let response = match state.entry.start(&body).await? {
        StartOutcome::Completed(result) => serde_json::to_value(result),
        StartOutcome::Started(run_id) => serde_json::to_value(StartResponse::Started {
            run_id: run_id.to_string(),
        }),
    }
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(response))
}

/// GET /workflows/birthday-card/{run_id}: poll a run.
#[tracing::instrument(skip(state))]
pub async fn status<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(run_id): Path<String>,
) -> Result<Json<RunStatusResponse>, ApiError> {
    let run_id = parse_run_id(&run_id)?;
    let status = state.orchestrator().get_status(run_id).await?;
    Ok(Json(status.into()))
}

/// GET /workflows/birthday-card/{run_id}/events: the run's journal.
#[tracing::instrument(skip(state))]
pub async fn events<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(run_id): Path<String>,
) -> Result<Json<Vec<EventEnvelopeResponse>>, ApiError> {
    let run_id = parse_run_id(&run_id)?;
    let envelopes = state.orchestrator().run_events(run_id).await?;

    let responses = envelopes
        .into_iter()
        .map(|e| EventEnvelopeResponse {
            event_id: e.event_id.to_string(),
            event_type: e.event_type,
            version: e.version.as_i64(),
            timestamp: e.timestamp.to_rfc3339(),
            payload: e.payload,
        })
        .collect();

    Ok(Json(responses))
}

fn parse_run_id(id: &str) -> Result<RunId, ApiError> {
    id.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid run ID format: {e}")))
}
