//! HTTP API for the birthday card saga.
//!
//! Starts runs, answers result polls, receives RSVP webhook clicks and
//! exposes health and Prometheus metrics, with request tracing on every route.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use event_store::EventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    EntryGateway, InMemoryImageGenerator, InMemoryMailer, InMemoryTextGenerator, SagaConfig,
    SagaOrchestrator, SystemClock,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::workflows::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: EventStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::ops::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::ops::health))
        .route("/workflows/birthday-card", post(routes::workflows::start::<S>))
        .route(
            "/workflows/birthday-card/{run_id}",
            get(routes::workflows::status::<S>),
        )
        .route(
            "/workflows/birthday-card/{run_id}/events",
            get(routes::workflows::events::<S>),
        )
        .route("/rsvp/{token}", get(routes::rsvp::resolve::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state with in-memory providers and the system clock.
pub fn create_default_state<S: EventStore + Clone + 'static>(
    event_store: S,
    config: SagaConfig,
) -> Arc<AppState<S>> {
    let mailer = InMemoryMailer::new();
    let orchestrator = SagaOrchestrator::new(
        event_store,
        InMemoryTextGenerator::new(),
        InMemoryImageGenerator::new(),
        mailer.clone(),
        SystemClock,
        config,
    );

    Arc::new(AppState {
        entry: EntryGateway::new(orchestrator),
        mailer,
    })
}
