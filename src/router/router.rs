// Router HTTP API implementation
// This file provides HTTP endpoints for signal intake, provider health,
// pipeline statistics, recent execution events and prometheus metrics
//
// Numan Thabit 2025 Nov

use crate::errors::PipelineError;
use crate::events::ExecutionEvent;
use crate::metrics;
use crate::pipeline::{Dispatch, ExecutionPipeline, PipelineStats};
use crate::router::health::ProviderHealth;
use crate::types::Signal;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router as AxumRouter,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Instant;
use tower_http::trace::TraceLayer;

#[derive(Debug, Serialize)]
pub struct SignalAccepted {
    pub status: &'static str,
    /// An older queued signal for the same pair was evicted
    pub displaced: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

/// Create the HTTP router with API endpoints
pub fn create_api_router(pipeline: Arc<ExecutionPipeline>) -> AxumRouter {
    AxumRouter::new()
        .route("/health", get(health_check))
        .route("/metrics", get(prometheus_metrics))
        .route("/api/v1/signals", post(submit_signal))
        .route("/api/v1/providers", get(get_providers))
        .route("/api/v1/stats", get(get_stats))
        .route("/api/v1/events", get(get_events))
        .layer(TraceLayer::new_for_http())
        .with_state(pipeline)
}

/// Health check endpoint
async fn health_check() -> StatusCode {
    StatusCode::OK
}

async fn prometheus_metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
}

/// Queue a strategy signal on its pair's worker
async fn submit_signal(
    State(pipeline): State<Arc<ExecutionPipeline>>,
    Json(signal): Json<Signal>,
) -> Result<(StatusCode, Json<SignalAccepted>), (StatusCode, Json<ErrorResponse>)> {
    match pipeline.dispatch(signal).await {
        Ok(Dispatch::Queued { displaced }) => Ok((
            StatusCode::ACCEPTED,
            Json(SignalAccepted {
                status: "queued",
                displaced: displaced.is_some(),
            }),
        )),
        Ok(Dispatch::Dropped(signal)) => Err((
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorResponse {
                error: format!("signal queue for {} is full", signal.pair),
            }),
        )),
        Err(e @ PipelineError::Shutdown) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )),
    }
}

/// Live health of every configured provider
async fn get_providers(
    State(pipeline): State<Arc<ExecutionPipeline>>,
) -> Json<Vec<ProviderHealth>> {
    Json(pipeline.tracker().snapshot(Instant::now()).await)
}

async fn get_stats(State(pipeline): State<Arc<ExecutionPipeline>>) -> Json<PipelineStats> {
    Json(pipeline.stats().await)
}

/// Recent attempts, outcomes and health transitions, oldest first
async fn get_events(
    State(pipeline): State<Arc<ExecutionPipeline>>,
    Query(query): Query<EventsQuery>,
) -> Json<Vec<ExecutionEvent>> {
    Json(pipeline.events().recent(query.limit.unwrap_or(100)).await)
}
