//! Typed plans handed from the committer to the store, and their outcomes

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::models::{alert::NewAlert, IssuedRecord, ShelfAlert};

/// Compare-and-set on the shelf row: the reading is applied only if the shelf
/// still holds the mass and observation time the plan was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingUpdate {
    pub shelf_id: i32,
    pub expected_mass: i32,
    pub expected_observed_at: DateTime<Utc>,
    pub mass: i32,
    pub observed_at: DateTime<Utc>,
}

/// The single state change a reading leads to
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Nothing beyond the shelf mass
    Noise,
    /// Complete the lease, open an issued record, mark the book issued
    Issue {
        book_id: i32,
        lease_id: i32,
        due_at: DateTime<Utc>,
    },
    /// Pickup of a reserved book whose lease ran out: expire it, release the book, alert
    ExpirePickup {
        book_id: i32,
        lease_id: i32,
        alert: NewAlert,
    },
    /// Close the open issued record and release the book
    Return { book_id: i32, record_id: i32 },
    /// A reserved book went back onto its own shelf; the lease stays active
    Restock { book_id: i32, lease_id: i32 },
    /// Anomaly without inventory change
    Raise {
        alert: NewAlert,
        holder_id: Option<i32>,
        lease_id: Option<i32>,
    },
    /// An available book left the shelf without a reservation
    UnreservedRemoval { book_id: i32 },
    /// An available book came back to its own shelf
    Replaced { book_id: i32 },
}

impl Effect {
    pub fn name(&self) -> &'static str {
        match self {
            Effect::Noise => "noise",
            Effect::Issue { .. } => "issue",
            Effect::ExpirePickup { .. } => "expire_pickup",
            Effect::Return { .. } => "return",
            Effect::Restock { .. } => "restock",
            Effect::Raise { .. } => "raise",
            Effect::UnreservedRemoval { .. } => "unreserved_removal",
            Effect::Replaced { .. } => "replaced",
        }
    }
}

/// One atomic unit of work for `Store::apply`
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub reading: ReadingUpdate,
    pub effect: Effect,
    /// Commit instant used for deadline re-checks and timestamps
    pub now: DateTime<Utc>,
}

/// What a committed reading did
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Noise,
    /// The reading is older than the last applied one and was dropped
    Superseded { last_observed_at: DateTime<Utc> },
    Issued {
        book_id: i32,
        lease_id: i32,
        record: IssuedRecord,
    },
    PickupRejected {
        book_id: i32,
        lease_id: Option<i32>,
        alert: ShelfAlert,
    },
    Returned { book_id: i32, record: IssuedRecord },
    Restocked { book_id: i32, lease_id: i32 },
    UnreservedRemoval { book_id: i32 },
    Replaced { book_id: i32 },
    Anomaly { alert: ShelfAlert },
}

impl Outcome {
    /// Whether the store appended an outbox event for this outcome
    pub fn produced_event(&self) -> bool {
        matches!(
            self,
            Outcome::Issued { .. }
                | Outcome::PickupRejected { .. }
                | Outcome::Returned { .. }
                | Outcome::Restocked { .. }
                | Outcome::Anomaly { .. }
        )
    }
}
