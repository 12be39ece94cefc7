//! Output of the door-lock / QR access coordinator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use super::lease::Lease;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AccessPurpose {
    Pickup,
    Return,
}

/// "User U is expected at shelf S for book B until T"
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct AccessGrant {
    #[validate(range(min = 1))]
    pub user_id: i32,
    #[validate(range(min = 1))]
    pub shelf_id: i32,
    #[validate(range(min = 1))]
    pub book_id: i32,
    pub purpose: AccessPurpose,
    pub valid_until: DateTime<Utc>,
}

/// What the engine did with a grant
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum GrantOutcome {
    /// A new lease now holds the book for the user
    Reserved { lease: Lease },
    /// The user's existing lease now runs at least until `valid_until`
    Extended { lease: Lease },
    /// Return grants need no engine state; the reading will close the record
    Acknowledged,
}
