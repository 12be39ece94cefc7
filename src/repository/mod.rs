//! Repository layer: persistence of leases, inventory, alerts and inboxes
//!
//! `Store` is the seam the engine talks to. `Repository` implements it on
//! Postgres; `memory::MemoryStore` implements it in-process for tests and
//! single-node demos. Every method that changes more than one row is a single
//! atomic unit in both implementations.

pub mod alerts;
pub mod inventory;
pub mod leases;
pub mod memory;
pub mod notifications;
pub mod transitions;
pub mod users;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};

use crate::{
    engine::transition::{Outcome, Transition},
    error::AppResult,
    models::{
        alert::AlertQuery,
        book::BookFilter,
        lease::ExpiredLease,
        Book, EngineEvent, IssuedRecord, Lease, NewLease, NewNotification, Notification,
        NotificationQuery, Shelf, ShelfAlert,
    },
};

pub use memory::MemoryStore;

#[async_trait]
pub trait Store: Send + Sync {
    /// Readiness check
    async fn ping(&self) -> AppResult<()>;

    // Inventory reads
    async fn get_book(&self, id: i32) -> AppResult<Book>;
    async fn get_shelf(&self, id: i32) -> AppResult<Shelf>;
    async fn find_books(&self, filter: &BookFilter) -> AppResult<Vec<Book>>;

    // Lease and issue reads
    async fn get_lease(&self, id: i32) -> AppResult<Lease>;
    async fn active_lease(&self, book_id: i32) -> AppResult<Option<Lease>>;
    /// Most recently created lease of the book, whatever its status
    async fn latest_lease(&self, book_id: i32) -> AppResult<Option<Lease>>;
    async fn open_record(&self, book_id: i32) -> AppResult<Option<IssuedRecord>>;
    async fn records_for_book(&self, book_id: i32) -> AppResult<Vec<IssuedRecord>>;

    // Lease transitions (each one atomic)
    /// Reserve a book. An overdue active lease on the book is expired first.
    async fn create_lease(&self, lease: &NewLease) -> AppResult<Lease>;
    /// Push back the deadline of an active lease; never shortens it
    async fn extend_lease(
        &self,
        lease_id: i32,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<Lease>;
    async fn cancel_lease(&self, lease_id: i32, now: DateTime<Utc>) -> AppResult<Lease>;
    async fn due_leases(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<Lease>>;
    /// `None` when the lease is no longer active or not yet due
    async fn expire_lease(&self, lease_id: i32, now: DateTime<Utc>) -> AppResult<Option<ExpiredLease>>;

    /// Apply one planned reading transition, or fail with `StaleRead`
    async fn apply(&self, transition: &Transition) -> AppResult<Outcome>;

    // Alerts
    async fn list_alerts(&self, query: &AlertQuery) -> AppResult<Vec<ShelfAlert>>;

    // Outbox and inboxes
    async fn pending_events(&self, limit: i64) -> AppResult<Vec<EngineEvent>>;
    /// Write the event's notifications and mark it delivered; a delivered event yields nothing
    async fn deliver_event(
        &self,
        event_id: i64,
        notifications: &[NewNotification],
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Notification>>;
    /// Newest first, at most `limit + 1` rows
    async fn list_notifications(
        &self,
        user_id: i32,
        query: &NotificationQuery,
    ) -> AppResult<Vec<Notification>>;
    async fn mark_read(&self, notification_id: i64, user_id: i32) -> AppResult<Notification>;
}

/// Role → recipient resolution backed by the identity provider's data
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    /// Every user holding the staff or administrator role
    async fn staff_recipients(&self) -> AppResult<Vec<i32>>;
}

/// Postgres-backed store
#[derive(Clone)]
pub struct Repository {
    pub pool: Pool<Postgres>,
    pub inventory: inventory::InventoryRepository,
    pub leases: leases::LeasesRepository,
    pub transitions: transitions::TransitionsRepository,
    pub alerts: alerts::AlertsRepository,
    pub notifications: notifications::NotificationsRepository,
    pub users: users::UsersRepository,
}

impl Repository {
    /// Create a new repository with the given database pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            inventory: inventory::InventoryRepository::new(pool.clone()),
            leases: leases::LeasesRepository::new(pool.clone()),
            transitions: transitions::TransitionsRepository::new(pool.clone()),
            alerts: alerts::AlertsRepository::new(pool.clone()),
            notifications: notifications::NotificationsRepository::new(pool.clone()),
            users: users::UsersRepository::new(pool.clone()),
            pool,
        }
    }
}

#[async_trait]
impl Store for Repository {
    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_book(&self, id: i32) -> AppResult<Book> {
        self.inventory.get_book(id).await
    }

    async fn get_shelf(&self, id: i32) -> AppResult<Shelf> {
        self.inventory.get_shelf(id).await
    }

    async fn find_books(&self, filter: &BookFilter) -> AppResult<Vec<Book>> {
        self.inventory.find_books(filter).await
    }

    async fn get_lease(&self, id: i32) -> AppResult<Lease> {
        self.leases.get_by_id(id).await
    }

    async fn active_lease(&self, book_id: i32) -> AppResult<Option<Lease>> {
        self.leases.active_for_book(book_id).await
    }

    async fn latest_lease(&self, book_id: i32) -> AppResult<Option<Lease>> {
        self.leases.latest_for_book(book_id).await
    }

    async fn open_record(&self, book_id: i32) -> AppResult<Option<IssuedRecord>> {
        self.leases.open_record(book_id).await
    }

    async fn records_for_book(&self, book_id: i32) -> AppResult<Vec<IssuedRecord>> {
        self.leases.records_for_book(book_id).await
    }

    async fn create_lease(&self, lease: &NewLease) -> AppResult<Lease> {
        self.leases.create(lease).await
    }

    async fn extend_lease(
        &self,
        lease_id: i32,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<Lease> {
        self.leases.extend(lease_id, deadline, now).await
    }

    async fn cancel_lease(&self, lease_id: i32, now: DateTime<Utc>) -> AppResult<Lease> {
        self.leases.cancel(lease_id, now).await
    }

    async fn due_leases(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<Lease>> {
        self.leases.due(now, limit).await
    }

    async fn expire_lease(&self, lease_id: i32, now: DateTime<Utc>) -> AppResult<Option<ExpiredLease>> {
        self.leases.expire(lease_id, now).await
    }

    async fn apply(&self, transition: &Transition) -> AppResult<Outcome> {
        self.transitions.apply(transition).await
    }

    async fn list_alerts(&self, query: &AlertQuery) -> AppResult<Vec<ShelfAlert>> {
        self.alerts.list(query).await
    }

    async fn pending_events(&self, limit: i64) -> AppResult<Vec<EngineEvent>> {
        self.notifications.pending_events(limit).await
    }

    async fn deliver_event(
        &self,
        event_id: i64,
        notifications: &[NewNotification],
        now: DateTime<Utc>,
    ) -> AppResult<Vec<Notification>> {
        self.notifications.deliver(event_id, notifications, now).await
    }

    async fn list_notifications(
        &self,
        user_id: i32,
        query: &NotificationQuery,
    ) -> AppResult<Vec<Notification>> {
        self.notifications.list_for_user(user_id, query).await
    }

    async fn mark_read(&self, notification_id: i64, user_id: i32) -> AppResult<Notification> {
        self.notifications.mark_read(notification_id, user_id).await
    }
}

#[async_trait]
impl RecipientDirectory for Repository {
    async fn staff_recipients(&self) -> AppResult<Vec<i32>> {
        self.users.staff_ids().await
    }
}
