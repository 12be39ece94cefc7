//! Sensor transport endpoint

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use crate::{engine::ReadingReport, error::AppResult};

use super::AuthenticatedUser;

/// One shelf weight reading
#[derive(Deserialize, Validate, ToSchema)]
pub struct ReadingRequest {
    /// Total mass on the shelf in grams
    #[validate(range(min = 0))]
    pub mass: i32,
    /// When the sensor took the reading; defaults to arrival time
    pub observed_at: Option<DateTime<Utc>>,
}

/// Ingest a shelf weight reading
#[utoipa::path(
    post,
    path = "/shelves/{id}/readings",
    tag = "readings",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Shelf ID")
    ),
    request_body = ReadingRequest,
    responses(
        (status = 200, description = "Reading classified and committed", body = ReadingReport),
        (status = 400, description = "Invalid reading or inactive shelf"),
        (status = 404, description = "Shelf not found"),
        (status = 409, description = "State kept changing under the reading", body = crate::error::ErrorResponse)
    )
)]
pub async fn ingest_reading(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(shelf_id): Path<i32>,
    Json(request): Json<ReadingRequest>,
) -> AppResult<Json<ReadingReport>> {
    claims.require_staff()?;
    request.validate()?;

    let observed_at = request.observed_at.unwrap_or_else(Utc::now);
    let report = state
        .services
        .committer
        .ingest(shelf_id, request.mass, observed_at)
        .await?;

    Ok(Json(report))
}
