//! Access coordinator endpoint

use axum::{extract::State, Json};
use validator::Validate;

use crate::{
    error::AppResult,
    models::{AccessGrant, GrantOutcome},
};

use super::AuthenticatedUser;

/// Record an access grant issued by the door-lock / QR coordinator
#[utoipa::path(
    post,
    path = "/access-grants",
    tag = "access",
    security(("bearer_auth" = [])),
    request_body = AccessGrant,
    responses(
        (status = 200, description = "Grant applied", body = GrantOutcome),
        (status = 400, description = "Grant already expired"),
        (status = 403, description = "Caller is not a staff service account"),
        (status = 409, description = "Book reserved by someone else or issued", body = crate::error::ErrorResponse)
    )
)]
pub async fn grant_access(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(grant): Json<AccessGrant>,
) -> AppResult<Json<GrantOutcome>> {
    claims.require_staff()?;
    grant.validate()?;

    let outcome = state.services.reservations.grant_access(&grant).await?;
    Ok(Json(outcome))
}
