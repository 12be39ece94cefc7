//! Per-user notification inbox

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};

use super::event::EventKind;

/// Inbox entry. Only `read` ever changes after insertion.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Notification {
    pub id: i64,
    pub recipient_id: i32,
    pub event_id: i64,
    pub kind: EventKind,
    pub title: String,
    pub body: String,
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub recipient_id: i32,
    pub event_id: i64,
    pub kind: EventKind,
    pub title: String,
    pub body: String,
    pub metadata: serde_json::Value,
}

/// Inbox listing parameters
#[derive(Debug, Default, Clone, Deserialize, IntoParams, ToSchema)]
pub struct NotificationQuery {
    /// Only notifications created at or after this instant
    pub since: Option<DateTime<Utc>>,
    /// Resume after this notification id (exclusive), as returned in `next_cursor`
    pub cursor: Option<i64>,
    pub limit: Option<i64>,
}

impl NotificationQuery {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 200;

    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }
}

/// One page of an inbox, newest first
#[derive(Debug, Serialize, ToSchema)]
pub struct NotificationPage {
    pub items: Vec<Notification>,
    /// Pass back as `cursor` to fetch the next (older) page
    pub next_cursor: Option<i64>,
}

impl NotificationPage {
    /// Builds a page from up to `limit + 1` rows; the extra row only signals more data
    pub fn from_rows(mut rows: Vec<Notification>, limit: i64) -> Self {
        let limit = limit as usize;
        let has_more = rows.len() > limit;
        rows.truncate(limit);
        let next_cursor = if has_more { rows.last().map(|n| n.id) } else { None };
        Self {
            items: rows,
            next_cursor,
        }
    }
}
