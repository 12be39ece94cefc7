//! Shelf alert endpoints

use axum::{
    extract::{Query, State},
    Json,
};

use crate::{
    error::AppResult,
    models::{alert::AlertQuery, ShelfAlert},
};

use super::AuthenticatedUser;

/// List shelf alerts, newest first (staff only)
#[utoipa::path(
    get,
    path = "/alerts",
    tag = "alerts",
    security(("bearer_auth" = [])),
    params(AlertQuery),
    responses(
        (status = 200, description = "Alerts", body = Vec<ShelfAlert>),
        (status = 403, description = "Staff privileges required")
    )
)]
pub async fn list_alerts(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Query(query): Query<AlertQuery>,
) -> AppResult<Json<Vec<ShelfAlert>>> {
    claims.require_staff()?;

    let alerts = state.services.store.list_alerts(&query).await?;
    Ok(Json(alerts))
}
