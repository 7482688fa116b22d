//! RSVP webhook endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use common::WaitToken;
use domain::RsvpPayload;
use event_store::EventStore;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::routes::workflows::AppState;

#[derive(Debug, Deserialize)]
pub struct RsvpQuery {
    pub reply: Option<String>,
    pub email: Option<String>,
}

#[derive(Serialize)]
pub struct RsvpResponse {
    pub ok: bool,
}

/// GET /rsvp/{token}?reply=yes|no&email=...: resolve a guest's wait.
///
/// Always answers `{"ok": true}`, whether the click resolved the wait, was a
/// duplicate, or named an unknown token.
#[tracing::instrument(skip(state, query))]
pub async fn resolve<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(token): Path<String>,
    Query(query): Query<RsvpQuery>,
) -> Result<Json<RsvpResponse>, ApiError> {
    let Ok(token) = token.parse::<WaitToken>() else {
        tracing::debug!("malformed RSVP token ignored");
        return Ok(Json(RsvpResponse { ok: true }));
    };

    let payload = RsvpPayload::from_query(query.reply.as_deref(), query.email.as_deref());
    state.orchestrator().resolve_rsvp(token, payload).await?;

    Ok(Json(RsvpResponse { ok: true }))
}
