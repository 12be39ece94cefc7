//! Outbox events: committed facts waiting to be fanned out

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{
    alert::{AlertType, ShelfAlert},
    book::{Book, Shelf},
    lease::{IssuedRecord, Lease},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ReservationCreated,
    ReservationCancelled,
    ReservationExpired,
    BookIssued,
    BookReturned,
    BookRestocked,
    AlertRaised,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ReservationCreated => "reservation_created",
            EventKind::ReservationCancelled => "reservation_cancelled",
            EventKind::ReservationExpired => "reservation_expired",
            EventKind::BookIssued => "book_issued",
            EventKind::BookReturned => "book_returned",
            EventKind::BookRestocked => "book_restocked",
            EventKind::AlertRaised => "alert_raised",
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reservation_created" => Ok(EventKind::ReservationCreated),
            "reservation_cancelled" => Ok(EventKind::ReservationCancelled),
            "reservation_expired" => Ok(EventKind::ReservationExpired),
            "book_issued" => Ok(EventKind::BookIssued),
            "book_returned" => Ok(EventKind::BookReturned),
            "book_restocked" => Ok(EventKind::BookRestocked),
            "alert_raised" => Ok(EventKind::AlertRaised),
            _ => Err(format!("Invalid event kind: {}", s)),
        }
    }
}

text_column!(EventKind);

/// Everything a recipient needs to render the event without further lookups
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EventPayload {
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub book_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub book_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shelf_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shelf_number: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holder_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returned_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_type: Option<AlertType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub magnitude: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_shelf_id: Option<i32>,
}

impl EventPayload {
    pub fn at(occurred_at: DateTime<Utc>) -> Self {
        Self {
            occurred_at: Some(occurred_at),
            ..Self::default()
        }
    }

    /// Book identity; the book's own shelf is used unless a shelf is set explicitly
    pub fn book(mut self, book: &Book) -> Self {
        self.book_id = Some(book.id);
        self.book_title = Some(book.title.clone());
        if self.shelf_id.is_none() {
            self.shelf_id = book.shelf_id;
        }
        self
    }

    pub fn shelf(mut self, shelf: &Shelf) -> Self {
        self.shelf_id = Some(shelf.id);
        self.shelf_number = Some(shelf.shelf_number);
        self
    }

    pub fn lease(mut self, lease: &Lease) -> Self {
        self.lease_id = Some(lease.id);
        self.deadline = Some(lease.deadline);
        self.holder_id = Some(lease.holder_id);
        self
    }

    pub fn record(mut self, record: &IssuedRecord) -> Self {
        self.record_id = Some(record.id);
        self.due_at = Some(record.due_at);
        self.returned_at = record.returned_at;
        self.holder_id = Some(record.holder_id);
        if self.lease_id.is_none() {
            self.lease_id = record.lease_id;
        }
        self
    }

    pub fn alert(mut self, alert: &ShelfAlert) -> Self {
        self.alert_id = Some(alert.id);
        self.alert_type = Some(alert.alert_type);
        self.magnitude = Some(alert.magnitude);
        self.expected_shelf_id = alert.expected_shelf_id;
        self.shelf_id = Some(alert.shelf_id);
        self
    }

    pub fn holder(mut self, holder_id: Option<i32>) -> Self {
        if holder_id.is_some() {
            self.holder_id = holder_id;
        }
        self
    }
}

/// Outbox row to be written in the same atomic unit as its transition
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub kind: EventKind,
    pub payload: EventPayload,
}

impl NewEvent {
    pub fn new(kind: EventKind, payload: EventPayload) -> Self {
        Self { kind, payload }
    }

    pub fn holder_id(&self) -> Option<i32> {
        self.payload.holder_id
    }
}

/// Persisted outbox event
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EngineEvent {
    pub id: i64,
    pub kind: EventKind,
    pub holder_id: Option<i32>,
    pub payload: EventPayload,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::book::BookStatus;

    #[test]
    fn explicit_shelf_wins_over_book_shelf() {
        let now = Utc::now();
        let book = Book {
            id: 4,
            title: "Dune".to_string(),
            mass: 300,
            status: BookStatus::Reserved,
            shelf_id: Some(1),
            updated_at: now,
        };
        let shelf = Shelf {
            id: 2,
            shelf_number: 12,
            mass: 0,
            capacity: 5000,
            active: true,
            updated_at: now,
        };

        let payload = EventPayload::at(now).shelf(&shelf).book(&book);
        assert_eq!(payload.shelf_id, Some(2));
        assert_eq!(payload.shelf_number, Some(12));
        assert_eq!(payload.book_title.as_deref(), Some("Dune"));
    }

    #[test]
    fn payload_omits_missing_fields() {
        let json = serde_json::to_value(EventPayload::at(Utc::now())).unwrap();
        let object = json.as_object().unwrap();
        assert!(object.contains_key("occurred_at"));
        assert!(!object.contains_key("book_id"));
    }
}
