//! Lease (reservation) and issued-record models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Lease lifecycle status. Everything but `Active` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LeaseStatus {
    Active,
    Completed,
    Expired,
    Cancelled,
}

impl LeaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseStatus::Active => "active",
            LeaseStatus::Completed => "completed",
            LeaseStatus::Expired => "expired",
            LeaseStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, LeaseStatus::Active)
    }
}

impl std::str::FromStr for LeaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(LeaseStatus::Active),
            "completed" => Ok(LeaseStatus::Completed),
            "expired" => Ok(LeaseStatus::Expired),
            "cancelled" => Ok(LeaseStatus::Cancelled),
            _ => Err(format!("Invalid lease status: {}", s)),
        }
    }
}

text_column!(LeaseStatus);

/// Time-bounded hold on a book for one user
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Lease {
    pub id: i32,
    pub book_id: i32,
    pub holder_id: i32,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub status: LeaseStatus,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Lease {
    pub fn is_active(&self) -> bool {
        self.status == LeaseStatus::Active
    }

    /// Single deadline predicate shared by the committer and the sweeper
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline
    }
}

/// Lease creation parameters
#[derive(Debug, Clone)]
pub struct NewLease {
    pub book_id: i32,
    pub holder_id: i32,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

/// A committed pickup; open until the matching return is committed
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct IssuedRecord {
    pub id: i32,
    pub book_id: i32,
    pub holder_id: i32,
    pub lease_id: Option<i32>,
    pub issued_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
}

impl IssuedRecord {
    pub fn is_open(&self) -> bool {
        self.returned_at.is_none()
    }
}

/// Result of one sweeper attempt on a lease
#[derive(Debug, Clone)]
pub struct ExpiredLease {
    pub lease: Lease,
    /// False when a pickup had already opened an issued record for the book
    pub released_book: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn lease(deadline: DateTime<Utc>) -> Lease {
        Lease {
            id: 1,
            book_id: 1,
            holder_id: 7,
            created_at: deadline - Duration::minutes(5),
            deadline,
            status: LeaseStatus::Active,
            closed_at: None,
        }
    }

    #[test]
    fn deadline_instant_counts_as_passed() {
        let now = Utc::now();
        assert!(lease(now).is_past_deadline(now));
        assert!(!lease(now + Duration::seconds(1)).is_past_deadline(now));
    }

    #[test]
    fn only_active_is_non_terminal() {
        assert!(!LeaseStatus::Active.is_terminal());
        assert!(LeaseStatus::Completed.is_terminal());
        assert!(LeaseStatus::Expired.is_terminal());
        assert!(LeaseStatus::Cancelled.is_terminal());
    }
}
