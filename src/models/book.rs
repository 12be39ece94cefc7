//! Book and shelf inventory models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Inventory status of a book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BookStatus {
    Available,
    Reserved,
    Issued,
}

impl BookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookStatus::Available => "available",
            BookStatus::Reserved => "reserved",
            BookStatus::Issued => "issued",
        }
    }

    /// The only status consistent with the lease and issue facts of a book.
    ///
    /// An open issued record wins over an active lease.
    pub fn derive(has_active_lease: bool, has_open_record: bool) -> Self {
        if has_open_record {
            BookStatus::Issued
        } else if has_active_lease {
            BookStatus::Reserved
        } else {
            BookStatus::Available
        }
    }
}

impl std::str::FromStr for BookStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(BookStatus::Available),
            "reserved" => Ok(BookStatus::Reserved),
            "issued" => Ok(BookStatus::Issued),
            _ => Err(format!("Invalid book status: {}", s)),
        }
    }
}

text_column!(BookStatus);

/// Book as tracked by the engine
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Book {
    pub id: i32,
    pub title: String,
    /// Nominal mass in grams
    pub mass: i32,
    pub status: BookStatus,
    pub shelf_id: Option<i32>,
    pub updated_at: DateTime<Utc>,
}

/// Weight-instrumented shelf
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Shelf {
    pub id: i32,
    pub shelf_number: i32,
    /// Last measured mass in grams
    pub mass: i32,
    pub capacity: i32,
    pub active: bool,
    /// Observation time of the last applied reading
    pub updated_at: DateTime<Utc>,
}

/// Where to look for books when matching a delta
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShelfScope {
    On(i32),
    Except(i32),
}

/// Inclusive mass range `[min, max]` in grams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MassWindow {
    pub min: i32,
    pub max: i32,
}

impl MassWindow {
    pub fn around(mass: i32, tolerance: i32) -> Self {
        Self {
            min: mass.saturating_sub(tolerance),
            max: mass.saturating_add(tolerance),
        }
    }

    pub fn contains(&self, mass: i32) -> bool {
        mass >= self.min && mass <= self.max
    }
}

/// Candidate search used by the committer
#[derive(Debug, Clone)]
pub struct BookFilter {
    pub scope: ShelfScope,
    pub statuses: Vec<BookStatus>,
    pub window: MassWindow,
}

impl BookFilter {
    pub fn matches(&self, book: &Book) -> bool {
        let on_scope = match self.scope {
            ShelfScope::On(id) => book.shelf_id == Some(id),
            ShelfScope::Except(id) => book.shelf_id.is_some_and(|s| s != id),
        };
        on_scope && self.statuses.contains(&book.status) && self.window.contains(book.mass)
    }
}
