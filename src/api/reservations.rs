//! Reservation endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use crate::{error::AppResult, models::Lease};

use super::AuthenticatedUser;

/// Create reservation request
#[derive(Deserialize, Validate, ToSchema)]
pub struct CreateReservationRequest {
    /// Book to hold
    #[validate(range(min = 1))]
    pub book_id: i32,
    /// Holder; defaults to the caller. Only staff may reserve for someone else.
    pub holder_id: Option<i32>,
    /// Hold duration in seconds
    #[validate(range(min = 1))]
    pub ttl_secs: i64,
}

/// Reserve a book
#[utoipa::path(
    post,
    path = "/reservations",
    tag = "reservations",
    security(("bearer_auth" = [])),
    request_body = CreateReservationRequest,
    responses(
        (status = 201, description = "Reservation created", body = Lease),
        (status = 400, description = "Invalid ttl"),
        (status = 404, description = "Book not found"),
        (status = 409, description = "Book already reserved or issued", body = crate::error::ErrorResponse)
    )
)]
pub async fn create_reservation(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(request): Json<CreateReservationRequest>,
) -> AppResult<(StatusCode, Json<Lease>)> {
    request.validate()?;

    let holder_id = request.holder_id.unwrap_or(claims.user_id);
    claims.require_self_or_staff(holder_id)?;

    let lease = state
        .services
        .reservations
        .create_reservation(request.book_id, holder_id, request.ttl_secs)
        .await?;

    Ok((StatusCode::CREATED, Json(lease)))
}

/// Get a reservation
#[utoipa::path(
    get,
    path = "/reservations/{id}",
    tag = "reservations",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Lease ID")
    ),
    responses(
        (status = 200, description = "Reservation", body = Lease),
        (status = 403, description = "Not the holder"),
        (status = 404, description = "Lease not found")
    )
)]
pub async fn get_reservation(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(lease_id): Path<i32>,
) -> AppResult<Json<Lease>> {
    let lease = state.services.reservations.get_reservation(lease_id, &claims).await?;
    Ok(Json(lease))
}

/// Cancel a reservation (holder or staff)
#[utoipa::path(
    post,
    path = "/reservations/{id}/cancel",
    tag = "reservations",
    security(("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Lease ID")
    ),
    responses(
        (status = 200, description = "Reservation cancelled", body = Lease),
        (status = 403, description = "Not the holder"),
        (status = 404, description = "Lease not found"),
        (status = 409, description = "Lease no longer active", body = crate::error::ErrorResponse)
    )
)]
pub async fn cancel_reservation(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(lease_id): Path<i32>,
) -> AppResult<Json<Lease>> {
    let lease = state
        .services
        .reservations
        .cancel_reservation(lease_id, &claims)
        .await?;
    Ok(Json(lease))
}
