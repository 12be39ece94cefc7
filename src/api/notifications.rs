//! Notification inbox endpoints

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    Stream, StreamExt,
};

use crate::{
    error::AppResult,
    models::{Notification, NotificationPage, NotificationQuery},
};

use super::AuthenticatedUser;

/// List the caller's notifications, newest first
#[utoipa::path(
    get,
    path = "/notifications",
    tag = "notifications",
    security(("bearer_auth" = [])),
    params(NotificationQuery),
    responses(
        (status = 200, description = "One page of the inbox", body = NotificationPage)
    )
)]
pub async fn list_notifications(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Query(query): Query<NotificationQuery>,
) -> AppResult<Json<NotificationPage>> {
    let page = state
        .services
        .notifications
        .list(claims.user_id, &query)
        .await?;
    Ok(Json(page))
}

/// Mark one of the caller's notifications as read
#[utoipa::path(
    post,
    path = "/notifications/{id}/read",
    tag = "notifications",
    security(("bearer_auth" = [])),
    params(
        ("id" = i64, Path, description = "Notification ID")
    ),
    responses(
        (status = 200, description = "Notification marked read", body = Notification),
        (status = 403, description = "Notification belongs to another user"),
        (status = 404, description = "Notification not found")
    )
)]
pub async fn mark_read(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(notification_id): Path<i64>,
) -> AppResult<Json<Notification>> {
    let notification = state
        .services
        .notifications
        .mark_read(notification_id, claims.user_id)
        .await?;
    Ok(Json(notification))
}

/// Live push of the caller's new notifications as Server-Sent Events.
///
/// Best effort: a `lagged` event means some were dropped and the client
/// should re-read `/notifications`.
#[utoipa::path(
    get,
    path = "/notifications/stream",
    tag = "notifications",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Event stream of Notification objects", content_type = "text/event-stream")
    )
)]
pub async fn stream_notifications(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let user_id = claims.user_id;
    tracing::debug!(user_id, "Notification stream opened");

    let stream = BroadcastStream::new(state.services.notifications.subscribe()).filter_map(move |item| match item {
        Ok(notification) if notification.recipient_id == user_id => Some(
            Event::default()
                .event(notification.kind.as_str())
                .id(notification.id.to_string())
                .json_data(&notification),
        ),
        Ok(_) => None,
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(user_id, skipped, "Notification stream lagged");
            Some(Ok(Event::default().event("lagged").data(skipped.to_string())))
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
