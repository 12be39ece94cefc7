//! On-demand lease expiry

use axum::{extract::State, Json};

use crate::{engine::SweepReport, error::AppResult};

use super::AuthenticatedUser;

/// Run one sweep of overdue leases now
#[utoipa::path(
    post,
    path = "/sweeper/run",
    tag = "sweeper",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Sweep finished", body = SweepReport),
        (status = 403, description = "Staff privileges required")
    )
)]
pub async fn run_sweeper(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<SweepReport>> {
    claims.require_staff()?;

    let report = state.services.sweeper.sweep().await?;
    tracing::info!(
        actor_id = claims.user_id,
        examined = report.examined,
        expired = report.expired,
        "Manual sweep completed"
    );
    Ok(Json(report))
}
