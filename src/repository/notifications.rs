//! Outbox events and per-user notification inboxes

use chrono::{DateTime, Utc};
use sqlx::{types::Json, FromRow, PgConnection, Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::{EngineEvent, EventKind, EventPayload, NewEvent, NewNotification, Notification, NotificationQuery},
};

/// Internal row structure for outbox queries
#[derive(Debug, Clone, FromRow)]
struct EngineEventRow {
    id: i64,
    kind: EventKind,
    holder_id: Option<i32>,
    payload: Json<EventPayload>,
    created_at: DateTime<Utc>,
    delivered_at: Option<DateTime<Utc>>,
}

impl From<EngineEventRow> for EngineEvent {
    fn from(row: EngineEventRow) -> Self {
        EngineEvent {
            id: row.id,
            kind: row.kind,
            holder_id: row.holder_id,
            payload: row.payload.0,
            created_at: row.created_at,
            delivered_at: row.delivered_at,
        }
    }
}

#[derive(Clone)]
pub struct NotificationsRepository {
    pool: Pool<Postgres>,
}

impl NotificationsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Oldest undelivered events first
    pub async fn pending_events(&self, limit: i64) -> AppResult<Vec<EngineEvent>> {
        let rows = sqlx::query_as::<_, EngineEventRow>(
            r#"
            SELECT * FROM engine_events
            WHERE delivered_at IS NULL
            ORDER BY id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EngineEvent::from).collect())
    }

    /// Insert the event's notifications and mark it delivered in one transaction
    pub async fn deliver(
        &self,
        event_id: i64,
        notifications: &[NewNotification],
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Notification>> {
        let mut tx = self.pool.begin().await?;

        let delivered_at: Option<Option<DateTime<Utc>>> = sqlx::query_scalar(
            "SELECT delivered_at FROM engine_events WHERE id = $1 FOR UPDATE",
        )
        .bind(event_id)
        .fetch_optional(&mut *tx)
        .await?;

        match delivered_at {
            None => return Err(AppError::NotFound(format!("Event with id {} not found", event_id))),
            Some(Some(_)) => return Ok(Vec::new()),
            Some(None) => {}
        }

        let mut inserted = Vec::with_capacity(notifications.len());
        for n in notifications {
            let row = sqlx::query_as::<_, Notification>(
                r#"
                INSERT INTO notifications (recipient_id, event_id, kind, title, body, metadata, read, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, FALSE, $7)
                ON CONFLICT (event_id, recipient_id) DO NOTHING
                RETURNING *
                "#,
            )
            .bind(n.recipient_id)
            .bind(n.event_id)
            .bind(n.kind)
            .bind(&n.title)
            .bind(&n.body)
            .bind(&n.metadata)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(row) = row {
                inserted.push(row);
            }
        }

        sqlx::query("UPDATE engine_events SET delivered_at = $2 WHERE id = $1")
            .bind(event_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(inserted)
    }

    /// Inbox page, newest first; fetches one extra row to detect a following page
    pub async fn list_for_user(&self, user_id: i32, query: &NotificationQuery) -> AppResult<Vec<Notification>> {
        let rows = sqlx::query_as::<_, Notification>(
            r#"
            SELECT * FROM notifications
            WHERE recipient_id = $1
              AND ($2::timestamptz IS NULL OR created_at >= $2)
              AND ($3::bigint IS NULL OR id < $3)
            ORDER BY id DESC
            LIMIT $4
            "#,
        )
        .bind(user_id)
        .bind(query.since)
        .bind(query.cursor)
        .bind(query.effective_limit() + 1)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Mark a notification read on behalf of its recipient
    pub async fn mark_read(&self, notification_id: i64, user_id: i32) -> AppResult<Notification> {
        let recipient: Option<i32> = sqlx::query_scalar("SELECT recipient_id FROM notifications WHERE id = $1")
            .bind(notification_id)
            .fetch_optional(&self.pool)
            .await?;

        match recipient {
            None => {
                return Err(AppError::NotFound(format!(
                    "Notification with id {} not found",
                    notification_id
                )))
            }
            Some(owner) if owner != user_id => {
                return Err(AppError::NotOwner(format!(
                    "Notification {} does not belong to user {}",
                    notification_id, user_id
                )))
            }
            Some(_) => {}
        }

        let row = sqlx::query_as::<_, Notification>(
            "UPDATE notifications SET read = TRUE WHERE id = $1 AND recipient_id = $2 RETURNING *",
        )
        .bind(notification_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }
}

/// Append an outbox event inside the caller's transaction
pub(super) async fn insert_event(conn: &mut PgConnection, event: &NewEvent, now: DateTime<Utc>) -> AppResult<i64> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO engine_events (kind, holder_id, payload, created_at)
        VALUES ($1, $2, $3, $4)
        RETURNING id
        "#,
    )
    .bind(event.kind)
    .bind(event.holder_id())
    .bind(Json(&event.payload))
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}
