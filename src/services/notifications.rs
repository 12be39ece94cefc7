//! Notification fan-out
//!
//! Drains the outbox: every committed event becomes one inbox entry for its
//! holder and one for each staff member. Inbox writes are durable and
//! idempotent; the live push channel is best effort on top of them.

use std::{sync::Arc, time::Duration};

use serde_json::Value;
use tokio::{
    sync::{broadcast, Notify},
    task::JoinHandle,
};

use crate::{
    config::NotificationsConfig,
    engine::Clock,
    error::{AppError, AppResult},
    models::{
        AlertType, EngineEvent, EventKind, EventPayload, NewNotification, Notification,
        NotificationPage, NotificationQuery,
    },
    repository::{RecipientDirectory, Store},
};

#[derive(Clone)]
pub struct NotificationsService {
    store: Arc<dyn Store>,
    directory: Arc<dyn RecipientDirectory>,
    clock: Arc<dyn Clock>,
    config: NotificationsConfig,
    outbox_signal: Arc<Notify>,
    live: broadcast::Sender<Notification>,
}

impl NotificationsService {
    pub fn new(
        store: Arc<dyn Store>,
        directory: Arc<dyn RecipientDirectory>,
        clock: Arc<dyn Clock>,
        config: NotificationsConfig,
        outbox_signal: Arc<Notify>,
    ) -> Self {
        let (live, _) = broadcast::channel(config.push_buffer.max(1));
        Self {
            store,
            directory,
            clock,
            config,
            outbox_signal,
            live,
        }
    }

    /// Live feed of every notification written from now on, for all recipients
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.live.subscribe()
    }

    /// Deliver every pending outbox event; returns the number of notifications written
    pub async fn drain(&self) -> AppResult<usize> {
        let mut written = 0;
        loop {
            let pending = self.store.pending_events(self.config.batch_size).await?;
            let full_batch = pending.len() as i64 >= self.config.batch_size;

            let mut failed = false;
            for event in &pending {
                match self.deliver(event).await {
                    Ok(delivered) => written += delivered.len(),
                    Err(e) => {
                        failed = true;
                        tracing::error!(event_id = event.id, kind = %event.kind, "Notification delivery failed: {}", e);
                    }
                }
            }

            if !full_batch || failed {
                return Ok(written);
            }
        }
    }

    /// Fan one event out to its recipients and push what was written
    pub async fn deliver(&self, event: &EngineEvent) -> AppResult<Vec<Notification>> {
        let staff = self.directory.staff_recipients().await?;
        let recipients = recipients(event.holder_id, &staff);

        let (title, body) = render(event.kind, &event.payload);
        let metadata = metadata(event)?;
        let notifications: Vec<NewNotification> = recipients
            .iter()
            .map(|recipient_id| NewNotification {
                recipient_id: *recipient_id,
                event_id: event.id,
                kind: event.kind,
                title: title.clone(),
                body: body.clone(),
                metadata: metadata.clone(),
            })
            .collect();

        let written = self
            .store
            .deliver_event(event.id, &notifications, self.clock.now())
            .await?;

        tracing::debug!(
            event_id = event.id,
            kind = %event.kind,
            recipients = recipients.len(),
            written = written.len(),
            "Event fanned out"
        );

        for notification in &written {
            // No subscriber is not an error: the inbox already has it
            let _ = self.live.send(notification.clone());
        }
        Ok(written)
    }

    pub async fn list(&self, user_id: i32, query: &NotificationQuery) -> AppResult<NotificationPage> {
        let rows = self.store.list_notifications(user_id, query).await?;
        Ok(NotificationPage::from_rows(rows, query.effective_limit()))
    }

    pub async fn mark_read(&self, notification_id: i64, user_id: i32) -> AppResult<Notification> {
        self.store.mark_read(notification_id, user_id).await
    }

    /// Drain the outbox whenever a commit signals it, and at least every poll interval
    pub fn spawn(self) -> JoinHandle<()> {
        let poll = Duration::from_secs(self.config.poll_interval_secs.max(1));
        tracing::info!(poll_interval_secs = poll.as_secs(), "Starting notification fan-out worker");
        tokio::spawn(async move {
            loop {
                match self.drain().await {
                    Ok(0) => {}
                    Ok(written) => tracing::debug!(written, "Outbox drained"),
                    Err(e) => tracing::error!("Outbox drain failed: {}", e),
                }
                tokio::select! {
                    _ = self.outbox_signal.notified() => {}
                    _ = tokio::time::sleep(poll) => {}
                }
            }
        })
    }
}

/// Holder first, then staff, each user once
fn recipients(holder_id: Option<i32>, staff: &[i32]) -> Vec<i32> {
    let mut recipients: Vec<i32> = holder_id.into_iter().collect();
    for id in staff {
        if !recipients.contains(id) {
            recipients.push(*id);
        }
    }
    recipients
}

fn describe_book(payload: &EventPayload) -> String {
    match (&payload.book_title, payload.book_id) {
        (Some(title), Some(id)) => format!("\"{}\" (book {})", title, id),
        (None, Some(id)) => format!("Book {}", id),
        _ => "An unidentified object".to_string(),
    }
}

fn describe_shelf(payload: &EventPayload) -> String {
    match (payload.shelf_number, payload.shelf_id) {
        (Some(number), _) => format!("shelf {}", number),
        (None, Some(id)) => format!("shelf #{}", id),
        _ => "an unknown shelf".to_string(),
    }
}

fn describe_holder(payload: &EventPayload) -> String {
    payload
        .holder_id
        .map(|id| format!("user {}", id))
        .unwrap_or_else(|| "no one".to_string())
}

fn render(kind: EventKind, payload: &EventPayload) -> (String, String) {
    let book = describe_book(payload);
    let shelf = describe_shelf(payload);
    let holder = describe_holder(payload);

    match kind {
        EventKind::ReservationCreated => (
            "Book reserved".to_string(),
            match payload.deadline {
                Some(deadline) => format!("{} is reserved for {} until {}.", book, holder, deadline),
                None => format!("{} is reserved for {}.", book, holder),
            },
        ),
        EventKind::ReservationCancelled => (
            "Reservation cancelled".to_string(),
            format!("The reservation of {} for {} was cancelled.", book, holder),
        ),
        EventKind::ReservationExpired => (
            "Reservation expired".to_string(),
            format!("The reservation of {} for {} expired before pickup.", book, holder),
        ),
        EventKind::BookIssued => (
            "Book issued".to_string(),
            match payload.due_at {
                Some(due_at) => format!("{} was picked up from {} by {}, due {}.", book, shelf, holder, due_at),
                None => format!("{} was picked up from {} by {}.", book, shelf, holder),
            },
        ),
        EventKind::BookReturned => (
            "Book returned".to_string(),
            format!("{} was returned to {}.", book, shelf),
        ),
        EventKind::BookRestocked => (
            "Reserved book put back".to_string(),
            format!("{} was put back on {} and stays reserved for {}.", book, shelf, holder),
        ),
        EventKind::AlertRaised => match payload.alert_type {
            Some(AlertType::WrongShelf) => (
                "Book on wrong shelf".to_string(),
                match payload.expected_shelf_id {
                    Some(expected) => format!(
                        "{} was detected on {} but belongs on shelf #{}.",
                        book, shelf, expected
                    ),
                    None => format!("{} was detected on {}, which is not its shelf.", book, shelf),
                },
            ),
            Some(AlertType::ExpiredPickupAttempt) => (
                "Pickup after reservation expired".to_string(),
                format!(
                    "{} was taken from {} after the reservation for {} had expired.",
                    book, shelf, holder
                ),
            ),
            Some(AlertType::UnknownObject) | None => (
                "Unknown object on shelf".to_string(),
                format!(
                    "An object of {} g changed the weight of {} and matches no book.",
                    payload.magnitude.map(|m| m.abs()).unwrap_or_default(),
                    shelf
                ),
            ),
        },
    }
}

/// The payload plus the event's identity, identical for every recipient
fn metadata(event: &EngineEvent) -> AppResult<Value> {
    let mut metadata = serde_json::to_value(&event.payload)
        .map_err(|e| AppError::Internal(format!("Cannot encode payload of event {}: {}", event.id, e)))?;
    if let Value::Object(map) = &mut metadata {
        map.insert("event_id".to_string(), Value::from(event.id));
        map.insert("event_kind".to_string(), Value::from(event.kind.as_str()));
    }
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        engine::ManualClock,
        models::{Book, BookStatus, NewLease},
        repository::{MemoryStore, MockRecipientDirectory},
    };
    use chrono::{DateTime, Utc};

    #[test]
    fn holder_is_not_notified_twice() {
        assert_eq!(recipients(Some(3), &[1, 3, 5]), vec![3, 1, 5]);
        assert_eq!(recipients(None, &[1, 5]), vec![1, 5]);
    }

    #[test]
    fn unknown_object_body_mentions_mass_and_shelf() {
        let payload = EventPayload {
            shelf_number: Some(2),
            alert_type: Some(AlertType::UnknownObject),
            magnitude: Some(-300),
            ..EventPayload::default()
        };
        let (title, body) = render(EventKind::AlertRaised, &payload);
        assert_eq!(title, "Unknown object on shelf");
        assert!(body.contains("300 g"));
        assert!(body.contains("shelf 2"));
    }

    #[test]
    fn metadata_carries_event_identity() {
        let event = EngineEvent {
            id: 42,
            kind: EventKind::BookIssued,
            holder_id: Some(7),
            payload: EventPayload {
                book_id: Some(1),
                ..EventPayload::default()
            },
            created_at: Utc::now(),
            delivered_at: None,
        };
        let metadata = metadata(&event).unwrap();
        assert_eq!(metadata["event_id"], 42);
        assert_eq!(metadata["event_kind"], "book_issued");
        assert_eq!(metadata["book_id"], 1);
    }

    #[tokio::test]
    async fn staff_are_resolved_once_per_event() {
        let t0 = DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::days(20_000);
        let store = Arc::new(MemoryStore::new());
        let shelf = store.add_shelf(1, 0, 10_000, t0);
        let book: Book = store.add_book("Dune", 300, Some(shelf.id), t0);
        store
            .create_lease(&NewLease {
                book_id: book.id,
                holder_id: 7,
                created_at: t0,
                deadline: t0 + chrono::Duration::minutes(5),
            })
            .await
            .unwrap();
        assert_eq!(store.get_book(book.id).await.unwrap().status, BookStatus::Reserved);

        let mut directory = MockRecipientDirectory::new();
        directory
            .expect_staff_recipients()
            .times(1)
            .returning(|| Ok(vec![100, 101]));

        let service = NotificationsService::new(
            store.clone(),
            Arc::new(directory),
            Arc::new(ManualClock::new(t0)),
            NotificationsConfig::default(),
            Arc::new(Notify::new()),
        );
        let mut live = service.subscribe();

        assert_eq!(service.drain().await.unwrap(), 3);
        let pushed = live.try_recv().unwrap();
        assert_eq!(pushed.recipient_id, 7);
        assert_eq!(pushed.kind, EventKind::ReservationCreated);

        // Nothing left to deliver, so the directory is not asked again
        assert_eq!(service.drain().await.unwrap(), 0);
    }
}
