//! Shelf alerts repository

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Pool, Postgres};

use crate::{
    error::AppResult,
    models::{alert::AlertQuery, NewAlert, ShelfAlert},
};

const DEFAULT_LIMIT: i64 = 100;

#[derive(Clone)]
pub struct AlertsRepository {
    pool: Pool<Postgres>,
}

impl AlertsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Newest alerts first
    pub async fn list(&self, query: &AlertQuery) -> AppResult<Vec<ShelfAlert>> {
        let alerts = sqlx::query_as::<_, ShelfAlert>(
            r#"
            SELECT * FROM shelf_alerts
            WHERE ($1::int IS NULL OR shelf_id = $1)
              AND (NOT $2 OR resolved_at IS NULL)
            ORDER BY id DESC
            LIMIT $3
            "#,
        )
        .bind(query.shelf_id)
        .bind(query.unresolved.unwrap_or(false))
        .bind(query.limit.unwrap_or(DEFAULT_LIMIT))
        .fetch_all(&self.pool)
        .await?;

        Ok(alerts)
    }
}

pub(super) async fn insert(conn: &mut PgConnection, alert: &NewAlert, now: DateTime<Utc>) -> AppResult<ShelfAlert> {
    let row = sqlx::query_as::<_, ShelfAlert>(
        r#"
        INSERT INTO shelf_alerts (shelf_id, alert_type, magnitude, book_id, expected_shelf_id, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(alert.shelf_id)
    .bind(alert.alert_type)
    .bind(alert.magnitude)
    .bind(alert.book_id)
    .bind(alert.expected_shelf_id)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row)
}
