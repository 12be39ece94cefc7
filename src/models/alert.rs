//! Shelf anomaly alerts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    WrongShelf,
    UnknownObject,
    ExpiredPickupAttempt,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::WrongShelf => "wrong_shelf",
            AlertType::UnknownObject => "unknown_object",
            AlertType::ExpiredPickupAttempt => "expired_pickup_attempt",
        }
    }
}

impl std::str::FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wrong_shelf" => Ok(AlertType::WrongShelf),
            "unknown_object" => Ok(AlertType::UnknownObject),
            "expired_pickup_attempt" => Ok(AlertType::ExpiredPickupAttempt),
            _ => Err(format!("Invalid alert type: {}", s)),
        }
    }
}

text_column!(AlertType);

/// Append-only anomaly record. `shelf_id` is where the weight change was seen.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct ShelfAlert {
    pub id: i32,
    pub shelf_id: i32,
    pub alert_type: AlertType,
    /// Signed mass delta in grams
    pub magnitude: i32,
    pub book_id: Option<i32>,
    /// Shelf the implicated book belongs to (wrong-shelf alerts)
    pub expected_shelf_id: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAlert {
    pub shelf_id: i32,
    pub alert_type: AlertType,
    pub magnitude: i32,
    pub book_id: Option<i32>,
    pub expected_shelf_id: Option<i32>,
}

/// Alert list filters
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct AlertQuery {
    pub shelf_id: Option<i32>,
    /// Only alerts without a resolution
    pub unresolved: Option<bool>,
    pub limit: Option<i64>,
}
