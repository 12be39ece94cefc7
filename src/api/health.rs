//! Liveness and readiness checks

use axum::{extract::State, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::AppResult;

/// Cap on how far the readiness check counts undelivered outbox events
const BACKLOG_COUNT_LIMIT: i64 = 1000;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize, ToSchema)]
pub struct ReadinessResponse {
    pub status: String,
    pub version: String,
    /// Engine events not yet fanned out to inboxes (counted up to 1000)
    pub outbox_backlog: usize,
}

/// Process is up
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Store reachable; reports how far notification fan-out lags behind
#[utoipa::path(
    get,
    path = "/ready",
    tag = "health",
    responses(
        (status = 200, description = "Service is ready", body = ReadinessResponse),
        (status = 500, description = "Store unreachable", body = crate::error::ErrorResponse)
    )
)]
pub async fn readiness_check(State(state): State<crate::AppState>) -> AppResult<Json<ReadinessResponse>> {
    state.services.ping().await?;
    let outbox_backlog = state
        .services
        .store
        .pending_events(BACKLOG_COUNT_LIMIT)
        .await?
        .len();

    if outbox_backlog > 0 {
        tracing::debug!(outbox_backlog, "Readiness check found undelivered events");
    }

    Ok(Json(ReadinessResponse {
        status: "ready".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        outbox_backlog,
    }))
}
