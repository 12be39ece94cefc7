//! In-process store
//!
//! Holds the whole engine state behind one mutex, so every trait method is a
//! single atomic unit. Preconditions are checked before anything is written;
//! a failing call leaves the state untouched.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::{
    engine::transition::{Effect, Outcome, Transition},
    error::{AppError, AppResult, ConflictKind},
    models::{
        alert::AlertQuery,
        book::BookFilter,
        lease::ExpiredLease,
        AlertType, Book, BookStatus, EngineEvent, EventKind, EventPayload, IssuedRecord, Lease,
        LeaseStatus, NewAlert, NewEvent, NewLease, NewNotification, Notification,
        NotificationQuery, Role, Shelf, ShelfAlert,
    },
};

use super::{RecipientDirectory, Store};

#[derive(Debug, Default)]
struct MemoryState {
    shelves: BTreeMap<i32, Shelf>,
    books: BTreeMap<i32, Book>,
    leases: BTreeMap<i32, Lease>,
    records: BTreeMap<i32, IssuedRecord>,
    alerts: BTreeMap<i32, ShelfAlert>,
    events: BTreeMap<i64, EngineEvent>,
    notifications: BTreeMap<i64, Notification>,
    users: BTreeMap<i32, Role>,
    next_shelf: i32,
    next_book: i32,
    next_lease: i32,
    next_record: i32,
    next_alert: i32,
    next_event: i64,
    next_notification: i64,
}

fn next_id<T: Copy + std::ops::AddAssign + From<u8>>(counter: &mut T) -> T {
    *counter += T::from(1);
    *counter
}

impl MemoryState {
    fn book(&self, id: i32) -> AppResult<&Book> {
        self.books
            .get(&id)
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))
    }

    fn shelf(&self, id: i32) -> AppResult<&Shelf> {
        self.shelves
            .get(&id)
            .ok_or_else(|| AppError::NotFound(format!("Shelf with id {} not found", id)))
    }

    fn lease(&self, id: i32) -> AppResult<&Lease> {
        self.leases
            .get(&id)
            .ok_or_else(|| AppError::NotFound(format!("Lease with id {} not found", id)))
    }

    fn active_lease(&self, book_id: i32) -> Option<&Lease> {
        self.leases
            .values()
            .find(|l| l.book_id == book_id && l.is_active())
    }

    fn open_record(&self, book_id: i32) -> Option<&IssuedRecord> {
        self.records
            .values()
            .find(|r| r.book_id == book_id && r.is_open())
    }

    fn set_book_status(&mut self, id: i32, status: BookStatus, now: DateTime<Utc>) -> AppResult<Book> {
        let book = self
            .books
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))?;
        book.status = status;
        book.updated_at = now;
        Ok(book.clone())
    }

    fn close_lease(&mut self, id: i32, status: LeaseStatus, now: DateTime<Utc>) -> AppResult<Lease> {
        match self.leases.get_mut(&id) {
            Some(lease) if lease.is_active() => {
                lease.status = status;
                lease.closed_at = Some(now);
                Ok(lease.clone())
            }
            _ => Err(AppError::StaleRead(format!("Lease {} is no longer active", id))),
        }
    }

    /// Set the book back to whatever its remaining facts say
    fn release_book(&mut self, book_id: i32, now: DateTime<Utc>) -> AppResult<Book> {
        let status = BookStatus::derive(
            self.active_lease(book_id).is_some(),
            self.open_record(book_id).is_some(),
        );
        let book = self.book(book_id)?;
        if book.status == status {
            return Ok(book.clone());
        }
        self.set_book_status(book_id, status, now)
    }

    fn expire_locked(&mut self, lease_id: i32, now: DateTime<Utc>) -> AppResult<(Lease, Book)> {
        let expired = self.close_lease(lease_id, LeaseStatus::Expired, now)?;
        let book = self.release_book(expired.book_id, now)?;
        self.push_event(
            NewEvent::new(
                EventKind::ReservationExpired,
                EventPayload::at(now).book(&book).lease(&expired),
            ),
            now,
        );
        Ok((expired, book))
    }

    fn insert_alert(&mut self, alert: &NewAlert, now: DateTime<Utc>) -> ShelfAlert {
        let row = ShelfAlert {
            id: next_id(&mut self.next_alert),
            shelf_id: alert.shelf_id,
            alert_type: alert.alert_type,
            magnitude: alert.magnitude,
            book_id: alert.book_id,
            expected_shelf_id: alert.expected_shelf_id,
            created_at: now,
            resolved_at: None,
            resolution: None,
        };
        self.alerts.insert(row.id, row.clone());
        row
    }

    fn push_event(&mut self, event: NewEvent, now: DateTime<Utc>) -> i64 {
        let id = next_id(&mut self.next_event);
        let holder_id = event.holder_id();
        self.events.insert(
            id,
            EngineEvent {
                id,
                kind: event.kind,
                holder_id,
                payload: event.payload,
                created_at: now,
                delivered_at: None,
            },
        );
        id
    }

    fn apply(&mut self, transition: &Transition) -> AppResult<Outcome> {
        let now = transition.now;
        let reading = &transition.reading;

        let shelf = self.shelf(reading.shelf_id)?.clone();
        if shelf.mass != reading.expected_mass || shelf.updated_at != reading.expected_observed_at {
            return Err(AppError::StaleRead(format!(
                "Shelf {} changed from {} g to {} g since planning",
                shelf.id, reading.expected_mass, shelf.mass
            )));
        }

        let outcome = match &transition.effect {
            Effect::Noise => Outcome::Noise,

            Effect::Issue {
                book_id,
                lease_id,
                due_at,
            } => {
                let lease = self.lease(*lease_id)?.clone();
                if !lease.is_active() || lease.book_id != *book_id {
                    return Err(AppError::StaleRead(format!(
                        "Lease {} on book {} is {}, cannot issue",
                        lease.id, lease.book_id, lease.status
                    )));
                }
                if lease.is_past_deadline(now) {
                    return Err(AppError::StaleRead(format!(
                        "Lease {} on book {} passed its deadline {} before commit",
                        lease.id, book_id, lease.deadline
                    )));
                }
                let book = self.book(*book_id)?;
                if book.status != BookStatus::Reserved {
                    return Err(AppError::StaleRead(format!(
                        "Book {} is {}, expected reserved",
                        book.id, book.status
                    )));
                }
                if self.open_record(*book_id).is_some() {
                    return Err(AppError::Conflict(
                        ConflictKind::AlreadyIssued,
                        format!("Book {} already has an open issued record", book_id),
                    ));
                }

                let completed = self.close_lease(lease.id, LeaseStatus::Completed, now)?;
                let record = IssuedRecord {
                    id: next_id(&mut self.next_record),
                    book_id: *book_id,
                    holder_id: completed.holder_id,
                    lease_id: Some(completed.id),
                    issued_at: now,
                    due_at: *due_at,
                    returned_at: None,
                };
                self.records.insert(record.id, record.clone());
                let book = self.set_book_status(*book_id, BookStatus::Issued, now)?;

                self.push_event(
                    NewEvent::new(
                        EventKind::BookIssued,
                        EventPayload::at(now)
                            .shelf(&shelf)
                            .book(&book)
                            .lease(&completed)
                            .record(&record),
                    ),
                    now,
                );

                Outcome::Issued {
                    book_id: book.id,
                    lease_id: completed.id,
                    record,
                }
            }

            Effect::ExpirePickup {
                book_id,
                lease_id,
                alert,
            } => {
                let lease = self.lease(*lease_id)?;
                if !lease.is_active() || lease.book_id != *book_id || !lease.is_past_deadline(now) {
                    return Err(AppError::StaleRead(format!(
                        "Lease {} on book {} is no longer an overdue active lease",
                        lease.id, book_id
                    )));
                }
                self.book(*book_id)?;

                let expired = self.close_lease(*lease_id, LeaseStatus::Expired, now)?;
                let book = self.release_book(*book_id, now)?;
                let alert = self.insert_alert(alert, now);

                self.push_event(
                    NewEvent::new(
                        EventKind::AlertRaised,
                        EventPayload::at(now)
                            .book(&book)
                            .lease(&expired)
                            .shelf(&shelf)
                            .alert(&alert),
                    ),
                    now,
                );

                Outcome::PickupRejected {
                    book_id: book.id,
                    lease_id: Some(expired.id),
                    alert,
                }
            }

            Effect::Return { book_id, record_id } => {
                let book = self.book(*book_id)?;
                let record_id = match self.open_record(*book_id) {
                    Some(record) if record.id == *record_id => record.id,
                    _ => {
                        return Err(AppError::StaleRead(format!(
                            "Issued record {} for book {} is no longer open",
                            record_id, book_id
                        )))
                    }
                };
                if book.status != BookStatus::Issued {
                    return Err(AppError::StaleRead(format!(
                        "Book {} is {}, expected issued",
                        book.id, book.status
                    )));
                }

                let record = match self.records.get_mut(&record_id) {
                    Some(record) => {
                        record.returned_at = Some(now);
                        record.clone()
                    }
                    None => {
                        return Err(AppError::NotFound(format!(
                            "Issued record with id {} not found",
                            record_id
                        )))
                    }
                };
                let book = self.release_book(*book_id, now)?;

                self.push_event(
                    NewEvent::new(
                        EventKind::BookReturned,
                        EventPayload::at(now).shelf(&shelf).book(&book).record(&record),
                    ),
                    now,
                );

                Outcome::Returned {
                    book_id: book.id,
                    record,
                }
            }

            Effect::Restock { book_id, lease_id } => {
                let lease = self.lease(*lease_id)?.clone();
                if !lease.is_active() || lease.book_id != *book_id {
                    return Err(AppError::StaleRead(format!(
                        "Lease {} is no longer active for book {}",
                        lease_id, book_id
                    )));
                }
                let book = self.book(*book_id)?;
                if book.status != BookStatus::Reserved {
                    return Err(AppError::StaleRead(format!(
                        "Book {} is {}, expected reserved",
                        book.id, book.status
                    )));
                }
                let book = self.set_book_status(*book_id, BookStatus::Reserved, now)?;

                self.push_event(
                    NewEvent::new(
                        EventKind::BookRestocked,
                        EventPayload::at(now).shelf(&shelf).book(&book).lease(&lease),
                    ),
                    now,
                );

                Outcome::Restocked {
                    book_id: book.id,
                    lease_id: lease.id,
                }
            }

            Effect::Raise {
                alert,
                holder_id,
                lease_id,
            } => {
                let book = match alert.book_id {
                    Some(id) => Some(self.book(id)?.clone()),
                    None => None,
                };
                let alert = self.insert_alert(alert, now);

                let mut payload = EventPayload::at(now);
                if let Some(book) = &book {
                    payload = payload.book(book);
                }
                payload = payload.shelf(&shelf).alert(&alert).holder(*holder_id);
                payload.lease_id = *lease_id;
                self.push_event(NewEvent::new(EventKind::AlertRaised, payload), now);

                if alert.alert_type == AlertType::ExpiredPickupAttempt {
                    Outcome::PickupRejected {
                        book_id: alert.book_id.unwrap_or_default(),
                        lease_id: *lease_id,
                        alert,
                    }
                } else {
                    Outcome::Anomaly { alert }
                }
            }

            Effect::UnreservedRemoval { book_id } => Outcome::UnreservedRemoval { book_id: *book_id },

            Effect::Replaced { book_id } => Outcome::Replaced { book_id: *book_id },
        };

        if let Some(shelf) = self.shelves.get_mut(&reading.shelf_id) {
            shelf.mass = reading.mass;
            shelf.updated_at = reading.observed_at;
        }

        Ok(outcome)
    }
}

/// Store kept entirely in memory; state is lost on drop
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_shelf(&self, shelf_number: i32, mass: i32, capacity: i32, at: DateTime<Utc>) -> Shelf {
        let mut state = self.state.lock();
        let shelf = Shelf {
            id: next_id(&mut state.next_shelf),
            shelf_number,
            mass,
            capacity,
            active: true,
            updated_at: at,
        };
        state.shelves.insert(shelf.id, shelf.clone());
        shelf
    }

    /// Seed an available book. When placed on a shelf its mass is added to the
    /// shelf's last reading, as if it had been there all along.
    pub fn add_book(&self, title: &str, mass: i32, shelf_id: Option<i32>, at: DateTime<Utc>) -> Book {
        let mut state = self.state.lock();
        let book = Book {
            id: next_id(&mut state.next_book),
            title: title.to_string(),
            mass,
            status: BookStatus::Available,
            shelf_id,
            updated_at: at,
        };
        if let Some(id) = shelf_id {
            if let Some(shelf) = state.shelves.get_mut(&id) {
                shelf.mass += mass;
            }
        }
        state.books.insert(book.id, book.clone());
        book
    }

    pub fn add_user(&self, id: i32, role: Role) {
        self.state.lock().users.insert(id, role);
    }

    pub fn set_shelf_active(&self, shelf_id: i32, active: bool) {
        if let Some(shelf) = self.state.lock().shelves.get_mut(&shelf_id) {
            shelf.active = active;
        }
    }

    /// Every outbox event, delivered or not, oldest first
    pub fn events(&self) -> Vec<EngineEvent> {
        self.state.lock().events.values().cloned().collect()
    }

    /// Every alert, oldest first
    pub fn alerts(&self) -> Vec<ShelfAlert> {
        self.state.lock().alerts.values().cloned().collect()
    }

    /// Every lease of a book, oldest first
    pub fn leases_for_book(&self, book_id: i32) -> Vec<Lease> {
        self.state
            .lock()
            .leases
            .values()
            .filter(|l| l.book_id == book_id)
            .cloned()
            .collect()
    }

    /// Verify the cross-entity rules that must hold after every atomic unit
    pub fn check_invariants(&self) -> Result<(), String> {
        let state = self.state.lock();
        for book in state.books.values() {
            let active = state
                .leases
                .values()
                .filter(|l| l.book_id == book.id && l.is_active())
                .count();
            if active > 1 {
                return Err(format!("Book {} has {} active leases", book.id, active));
            }
            let open = state
                .records
                .values()
                .filter(|r| r.book_id == book.id && r.is_open())
                .count();
            if open > 1 {
                return Err(format!("Book {} has {} open issued records", book.id, open));
            }
            let expected = BookStatus::derive(active == 1, open == 1);
            if book.status != expected {
                return Err(format!(
                    "Book {} is {} but its leases and records say {}",
                    book.id, book.status, expected
                ));
            }
        }
        for lease in state.leases.values() {
            if lease.status.is_terminal() != lease.closed_at.is_some() {
                return Err(format!("Lease {} is {} with closed_at {:?}", lease.id, lease.status, lease.closed_at));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    async fn get_book(&self, id: i32) -> AppResult<Book> {
        self.state.lock().book(id).cloned()
    }

    async fn get_shelf(&self, id: i32) -> AppResult<Shelf> {
        self.state.lock().shelf(id).cloned()
    }

    async fn find_books(&self, filter: &BookFilter) -> AppResult<Vec<Book>> {
        let state = self.state.lock();
        let mut books: Vec<Book> = state
            .books
            .values()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect();
        books.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
        Ok(books)
    }

    async fn get_lease(&self, id: i32) -> AppResult<Lease> {
        self.state.lock().lease(id).cloned()
    }

    async fn active_lease(&self, book_id: i32) -> AppResult<Option<Lease>> {
        Ok(self.state.lock().active_lease(book_id).cloned())
    }

    async fn latest_lease(&self, book_id: i32) -> AppResult<Option<Lease>> {
        let state = self.state.lock();
        Ok(state
            .leases
            .values()
            .filter(|l| l.book_id == book_id)
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            .cloned())
    }

    async fn open_record(&self, book_id: i32) -> AppResult<Option<IssuedRecord>> {
        Ok(self.state.lock().open_record(book_id).cloned())
    }

    async fn records_for_book(&self, book_id: i32) -> AppResult<Vec<IssuedRecord>> {
        let state = self.state.lock();
        let mut records: Vec<IssuedRecord> = state
            .records
            .values()
            .filter(|r| r.book_id == book_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.issued_at.cmp(&b.issued_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn create_lease(&self, new: &NewLease) -> AppResult<Lease> {
        let mut state = self.state.lock();
        let book_id = state.book(new.book_id)?.id;

        if state.open_record(book_id).is_some() || state.book(book_id)?.status == BookStatus::Issued {
            return Err(AppError::Conflict(
                ConflictKind::AlreadyIssued,
                format!("Book {} is already issued", book_id),
            ));
        }

        if let Some(existing) = state.active_lease(book_id).cloned() {
            if !existing.is_past_deadline(new.created_at) {
                return Err(AppError::Conflict(
                    ConflictKind::AlreadyReserved,
                    format!(
                        "Book {} is already reserved by lease {} until {}",
                        book_id, existing.id, existing.deadline
                    ),
                ));
            }
            state.expire_locked(existing.id, new.created_at)?;
        }

        let lease = Lease {
            id: next_id(&mut state.next_lease),
            book_id,
            holder_id: new.holder_id,
            created_at: new.created_at,
            deadline: new.deadline,
            status: LeaseStatus::Active,
            closed_at: None,
        };
        state.leases.insert(lease.id, lease.clone());
        let book = state.set_book_status(book_id, BookStatus::Reserved, new.created_at)?;

        state.push_event(
            NewEvent::new(
                EventKind::ReservationCreated,
                EventPayload::at(new.created_at).book(&book).lease(&lease),
            ),
            new.created_at,
        );

        Ok(lease)
    }

    async fn extend_lease(
        &self,
        lease_id: i32,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<Lease> {
        let mut state = self.state.lock();
        let lease = state.lease(lease_id)?;
        if !lease.is_active() || lease.is_past_deadline(now) {
            return Err(AppError::Conflict(
                ConflictKind::NotActive,
                format!("Lease {} on book {} is not active", lease.id, lease.book_id),
            ));
        }

        match state.leases.get_mut(&lease_id) {
            Some(lease) => {
                lease.deadline = lease.deadline.max(deadline);
                Ok(lease.clone())
            }
            None => Err(AppError::NotFound(format!("Lease with id {} not found", lease_id))),
        }
    }

    async fn cancel_lease(&self, lease_id: i32, now: DateTime<Utc>) -> AppResult<Lease> {
        let mut state = self.state.lock();
        let lease = state.lease(lease_id)?.clone();
        if !lease.is_active() {
            return Err(AppError::Conflict(
                ConflictKind::NotActive,
                format!(
                    "Lease {} on book {} is {}, not active",
                    lease.id, lease.book_id, lease.status
                ),
            ));
        }

        if lease.is_past_deadline(now) {
            state.expire_locked(lease.id, now)?;
            return Err(AppError::Conflict(
                ConflictKind::NotActive,
                format!(
                    "Lease {} on book {} expired at {}",
                    lease.id, lease.book_id, lease.deadline
                ),
            ));
        }

        let cancelled = state.close_lease(lease.id, LeaseStatus::Cancelled, now)?;
        let book = state.release_book(lease.book_id, now)?;
        state.push_event(
            NewEvent::new(
                EventKind::ReservationCancelled,
                EventPayload::at(now).book(&book).lease(&cancelled),
            ),
            now,
        );

        Ok(cancelled)
    }

    async fn due_leases(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<Lease>> {
        let state = self.state.lock();
        let mut due: Vec<Lease> = state
            .leases
            .values()
            .filter(|l| l.is_active() && l.is_past_deadline(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.deadline.cmp(&b.deadline).then(a.id.cmp(&b.id)));
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn expire_lease(&self, lease_id: i32, now: DateTime<Utc>) -> AppResult<Option<ExpiredLease>> {
        let mut state = self.state.lock();
        let lease = state.lease(lease_id)?;
        if !lease.is_active() || !lease.is_past_deadline(now) {
            return Ok(None);
        }

        let (expired, book) = state.expire_locked(lease_id, now)?;
        Ok(Some(ExpiredLease {
            lease: expired,
            released_book: book.status == BookStatus::Available,
        }))
    }

    async fn apply(&self, transition: &Transition) -> AppResult<Outcome> {
        self.state.lock().apply(transition)
    }

    async fn list_alerts(&self, query: &AlertQuery) -> AppResult<Vec<ShelfAlert>> {
        let state = self.state.lock();
        let unresolved = query.unresolved.unwrap_or(false);
        Ok(state
            .alerts
            .values()
            .rev()
            .filter(|a| query.shelf_id.map_or(true, |id| a.shelf_id == id))
            .filter(|a| !unresolved || a.resolved_at.is_none())
            .take(query.limit.unwrap_or(100).max(0) as usize)
            .cloned()
            .collect())
    }

    async fn pending_events(&self, limit: i64) -> AppResult<Vec<EngineEvent>> {
        let state = self.state.lock();
        Ok(state
            .events
            .values()
            .filter(|e| e.delivered_at.is_none())
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn deliver_event(
        &self,
        event_id: i64,
        notifications: &[NewNotification],
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Notification>> {
        let mut state = self.state.lock();
        match state.events.get(&event_id) {
            None => return Err(AppError::NotFound(format!("Event with id {} not found", event_id))),
            Some(event) if event.delivered_at.is_some() => return Ok(Vec::new()),
            Some(_) => {}
        }

        let mut inserted = Vec::with_capacity(notifications.len());
        for n in notifications {
            let duplicate = state
                .notifications
                .values()
                .any(|existing| existing.event_id == n.event_id && existing.recipient_id == n.recipient_id);
            if duplicate {
                continue;
            }
            let row = Notification {
                id: next_id(&mut state.next_notification),
                recipient_id: n.recipient_id,
                event_id: n.event_id,
                kind: n.kind,
                title: n.title.clone(),
                body: n.body.clone(),
                metadata: n.metadata.clone(),
                read: false,
                created_at: now,
            };
            state.notifications.insert(row.id, row.clone());
            inserted.push(row);
        }

        if let Some(event) = state.events.get_mut(&event_id) {
            event.delivered_at = Some(now);
        }
        Ok(inserted)
    }

    async fn list_notifications(
        &self,
        user_id: i32,
        query: &NotificationQuery,
    ) -> AppResult<Vec<Notification>> {
        let state = self.state.lock();
        Ok(state
            .notifications
            .values()
            .rev()
            .filter(|n| n.recipient_id == user_id)
            .filter(|n| query.since.map_or(true, |since| n.created_at >= since))
            .filter(|n| query.cursor.map_or(true, |cursor| n.id < cursor))
            .take((query.effective_limit() + 1) as usize)
            .cloned()
            .collect())
    }

    async fn mark_read(&self, notification_id: i64, user_id: i32) -> AppResult<Notification> {
        let mut state = self.state.lock();
        match state.notifications.get_mut(&notification_id) {
            None => Err(AppError::NotFound(format!(
                "Notification with id {} not found",
                notification_id
            ))),
            Some(n) if n.recipient_id != user_id => Err(AppError::NotOwner(format!(
                "Notification {} does not belong to user {}",
                notification_id, user_id
            ))),
            Some(n) => {
                n.read = true;
                Ok(n.clone())
            }
        }
    }
}

#[async_trait]
impl RecipientDirectory for MemoryStore {
    async fn staff_recipients(&self) -> AppResult<Vec<i32>> {
        let state = self.state.lock();
        Ok(state
            .users
            .iter()
            .filter(|(_, role)| role.is_staff())
            .map(|(id, _)| *id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn seeded() -> (MemoryStore, Book, DateTime<Utc>) {
        let t0 = DateTime::<Utc>::UNIX_EPOCH + Duration::days(20_000);
        let store = MemoryStore::new();
        let shelf = store.add_shelf(1, 0, 10_000, t0);
        let book = store.add_book("Dune", 300, Some(shelf.id), t0);
        (store, book, t0)
    }

    #[tokio::test]
    async fn overdue_lease_is_replaced_on_new_reservation() {
        let (store, book, t0) = seeded();
        let first = store
            .create_lease(&NewLease {
                book_id: book.id,
                holder_id: 7,
                created_at: t0,
                deadline: t0 + Duration::minutes(5),
            })
            .await
            .unwrap();

        let later = t0 + Duration::minutes(10);
        let second = store
            .create_lease(&NewLease {
                book_id: book.id,
                holder_id: 8,
                created_at: later,
                deadline: later + Duration::minutes(5),
            })
            .await
            .unwrap();

        assert_eq!(store.get_lease(first.id).await.unwrap().status, LeaseStatus::Expired);
        assert_eq!(second.status, LeaseStatus::Active);
        store.check_invariants().unwrap();

        let kinds: Vec<EventKind> = store.events().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::ReservationCreated,
                EventKind::ReservationExpired,
                EventKind::ReservationCreated,
            ]
        );
    }

    #[tokio::test]
    async fn failed_reservation_leaves_state_untouched() {
        let (store, book, t0) = seeded();
        let lease = NewLease {
            book_id: book.id,
            holder_id: 7,
            created_at: t0,
            deadline: t0 + Duration::minutes(5),
        };
        store.create_lease(&lease).await.unwrap();
        let before = store.events().len();

        let err = store.create_lease(&lease).await.unwrap_err();
        assert_eq!(err.conflict_kind(), Some(ConflictKind::AlreadyReserved));
        assert_eq!(store.events().len(), before);
        assert_eq!(store.leases_for_book(book.id).len(), 1);
    }

    #[tokio::test]
    async fn extend_never_shortens() {
        let (store, book, t0) = seeded();
        let lease = store
            .create_lease(&NewLease {
                book_id: book.id,
                holder_id: 7,
                created_at: t0,
                deadline: t0 + Duration::minutes(30),
            })
            .await
            .unwrap();

        let extended = store
            .extend_lease(lease.id, t0 + Duration::minutes(10), t0)
            .await
            .unwrap();
        assert_eq!(extended.deadline, lease.deadline);
    }

    #[tokio::test]
    async fn staff_directory_lists_staff_and_admins() {
        let store = MemoryStore::new();
        store.add_user(1, Role::Reader);
        store.add_user(2, Role::Staff);
        store.add_user(3, Role::Administrator);
        assert_eq!(store.staff_recipients().await.unwrap(), vec![2, 3]);
    }
}
