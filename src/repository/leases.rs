//! Leases repository: reservations and issued records
//!
//! Every unit that locks more than one row takes them in the order shelf,
//! lease, book, issued record.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Pool, Postgres};

use crate::{
    error::{AppError, AppResult, ConflictKind},
    models::{
        lease::ExpiredLease, Book, BookStatus, EventKind, EventPayload, IssuedRecord, Lease,
        LeaseStatus, NewEvent, NewLease,
    },
};

use super::{inventory, notifications};

#[derive(Clone)]
pub struct LeasesRepository {
    pool: Pool<Postgres>,
}

impl LeasesRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get lease by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<Lease> {
        sqlx::query_as::<_, Lease>("SELECT * FROM leases WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Lease with id {} not found", id)))
    }

    pub async fn active_for_book(&self, book_id: i32) -> AppResult<Option<Lease>> {
        let lease = sqlx::query_as::<_, Lease>(
            "SELECT * FROM leases WHERE book_id = $1 AND status = 'active'",
        )
        .bind(book_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(lease)
    }

    pub async fn latest_for_book(&self, book_id: i32) -> AppResult<Option<Lease>> {
        let lease = sqlx::query_as::<_, Lease>(
            "SELECT * FROM leases WHERE book_id = $1 ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(book_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(lease)
    }

    pub async fn open_record(&self, book_id: i32) -> AppResult<Option<IssuedRecord>> {
        let record = sqlx::query_as::<_, IssuedRecord>(
            "SELECT * FROM issued_records WHERE book_id = $1 AND returned_at IS NULL",
        )
        .bind(book_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    pub async fn records_for_book(&self, book_id: i32) -> AppResult<Vec<IssuedRecord>> {
        let records = sqlx::query_as::<_, IssuedRecord>(
            "SELECT * FROM issued_records WHERE book_id = $1 ORDER BY issued_at, id",
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    /// Create a reservation
    pub async fn create(&self, new: &NewLease) -> AppResult<Lease> {
        let mut tx = self.pool.begin().await?;

        // Lease, then book, then issued record. The lease id is found without
        // a lock first; a lease inserted after that trips the unique index.
        let existing = match active_lease_id(&mut tx, new.book_id).await? {
            Some(id) => Some(lock_lease(&mut tx, id).await?).filter(|l| l.is_active()),
            None => None,
        };
        let mut book = inventory::lock_book(&mut tx, new.book_id).await?;

        if lock_open_record(&mut tx, book.id).await?.is_some() || book.status == BookStatus::Issued {
            return Err(AppError::Conflict(
                ConflictKind::AlreadyIssued,
                format!("Book {} is already issued", book.id),
            ));
        }

        if let Some(existing) = existing {
            if !existing.is_past_deadline(new.created_at) {
                return Err(AppError::Conflict(
                    ConflictKind::AlreadyReserved,
                    format!(
                        "Book {} is already reserved by lease {} until {}",
                        book.id, existing.id, existing.deadline
                    ),
                ));
            }
            // Overdue but not yet swept: settle it before granting the new hold
            let (_, released) = expire_locked(&mut tx, &existing, &book, new.created_at).await?;
            book = released;
        }

        let lease = sqlx::query_as::<_, Lease>(
            r#"
            INSERT INTO leases (book_id, holder_id, created_at, deadline, status)
            VALUES ($1, $2, $3, $4, 'active')
            RETURNING *
            "#,
        )
        .bind(new.book_id)
        .bind(new.holder_id)
        .bind(new.created_at)
        .bind(new.deadline)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| unique_violation_as(e, ConflictKind::AlreadyReserved, new.book_id))?;

        let book = inventory::set_book_status(&mut tx, book.id, BookStatus::Reserved, new.created_at).await?;

        notifications::insert_event(
            &mut tx,
            &NewEvent::new(
                EventKind::ReservationCreated,
                EventPayload::at(new.created_at).book(&book).lease(&lease),
            ),
            new.created_at,
        )
        .await?;

        tx.commit().await?;
        Ok(lease)
    }

    /// Extend an active lease up to a later deadline
    pub async fn extend(&self, lease_id: i32, deadline: DateTime<Utc>, now: DateTime<Utc>) -> AppResult<Lease> {
        let mut tx = self.pool.begin().await?;

        let lease = lock_lease(&mut tx, lease_id).await?;
        if !lease.is_active() || lease.is_past_deadline(now) {
            return Err(AppError::Conflict(
                ConflictKind::NotActive,
                format!("Lease {} on book {} is not active", lease.id, lease.book_id),
            ));
        }

        let lease = sqlx::query_as::<_, Lease>(
            "UPDATE leases SET deadline = GREATEST(deadline, $2) WHERE id = $1 RETURNING *",
        )
        .bind(lease_id)
        .bind(deadline)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(lease)
    }

    /// Cancel an active lease and release its book
    pub async fn cancel(&self, lease_id: i32, now: DateTime<Utc>) -> AppResult<Lease> {
        let mut tx = self.pool.begin().await?;

        let lease = lock_lease(&mut tx, lease_id).await?;
        if !lease.is_active() {
            return Err(AppError::Conflict(
                ConflictKind::NotActive,
                format!(
                    "Lease {} on book {} is {}, not active",
                    lease.id, lease.book_id, lease.status
                ),
            ));
        }

        let book = inventory::lock_book(&mut tx, lease.book_id).await?;

        if lease.is_past_deadline(now) {
            expire_locked(&mut tx, &lease, &book, now).await?;
            tx.commit().await?;
            return Err(AppError::Conflict(
                ConflictKind::NotActive,
                format!(
                    "Lease {} on book {} expired at {}",
                    lease.id, lease.book_id, lease.deadline
                ),
            ));
        }

        let cancelled = close_lease(&mut tx, lease.id, LeaseStatus::Cancelled, now).await?;
        let book = release_book(&mut tx, &book, now).await?;

        notifications::insert_event(
            &mut tx,
            &NewEvent::new(
                EventKind::ReservationCancelled,
                EventPayload::at(now).book(&book).lease(&cancelled),
            ),
            now,
        )
        .await?;

        tx.commit().await?;
        Ok(cancelled)
    }

    /// Active leases whose deadline has passed
    pub async fn due(&self, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<Lease>> {
        let leases = sqlx::query_as::<_, Lease>(
            r#"
            SELECT * FROM leases
            WHERE status = 'active' AND deadline <= $1
            ORDER BY deadline, id
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(leases)
    }

    /// Expire one lease if it is still active and due
    pub async fn expire(&self, lease_id: i32, now: DateTime<Utc>) -> AppResult<Option<ExpiredLease>> {
        let mut tx = self.pool.begin().await?;

        let lease = lock_lease(&mut tx, lease_id).await?;
        if !lease.is_active() || !lease.is_past_deadline(now) {
            return Ok(None);
        }

        let book = inventory::lock_book(&mut tx, lease.book_id).await?;
        let (expired, released) = expire_locked(&mut tx, &lease, &book, now).await?;

        tx.commit().await?;
        Ok(Some(ExpiredLease {
            lease: expired,
            released_book: released.status == BookStatus::Available,
        }))
    }
}

pub(super) async fn lock_lease(conn: &mut PgConnection, id: i32) -> AppResult<Lease> {
    sqlx::query_as::<_, Lease>("SELECT * FROM leases WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Lease with id {} not found", id)))
}

async fn active_lease_id(conn: &mut PgConnection, book_id: i32) -> AppResult<Option<i32>> {
    let id = sqlx::query_scalar::<_, i32>("SELECT id FROM leases WHERE book_id = $1 AND status = 'active'")
        .bind(book_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(id)
}

pub(super) async fn lock_active_lease(conn: &mut PgConnection, book_id: i32) -> AppResult<Option<Lease>> {
    let lease = sqlx::query_as::<_, Lease>(
        "SELECT * FROM leases WHERE book_id = $1 AND status = 'active' FOR UPDATE",
    )
    .bind(book_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(lease)
}

pub(super) async fn lock_open_record(conn: &mut PgConnection, book_id: i32) -> AppResult<Option<IssuedRecord>> {
    let record = sqlx::query_as::<_, IssuedRecord>(
        "SELECT * FROM issued_records WHERE book_id = $1 AND returned_at IS NULL FOR UPDATE",
    )
    .bind(book_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(record)
}

pub(super) async fn close_lease(
    conn: &mut PgConnection,
    id: i32,
    status: LeaseStatus,
    now: DateTime<Utc>,
) -> AppResult<Lease> {
    let lease = sqlx::query_as::<_, Lease>(
        r#"
        UPDATE leases SET status = $2, closed_at = $3
        WHERE id = $1 AND status = 'active'
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(status)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::StaleRead(format!("Lease {} is no longer active", id)))?;
    Ok(lease)
}

/// Set the book back to whatever its remaining facts say (no lease left after a close)
pub(super) async fn release_book(conn: &mut PgConnection, book: &Book, now: DateTime<Utc>) -> AppResult<Book> {
    let has_open_record = lock_open_record(conn, book.id).await?.is_some();
    let status = BookStatus::derive(false, has_open_record);
    if status == book.status {
        return Ok(book.clone());
    }
    inventory::set_book_status(conn, book.id, status, now).await
}

/// Expire a locked lease, release its book and append the outbox event
pub(super) async fn expire_locked(
    conn: &mut PgConnection,
    lease: &Lease,
    book: &Book,
    now: DateTime<Utc>,
) -> AppResult<(Lease, Book)> {
    let expired = close_lease(conn, lease.id, LeaseStatus::Expired, now).await?;
    let book = release_book(conn, book, now).await?;

    notifications::insert_event(
        conn,
        &NewEvent::new(
            EventKind::ReservationExpired,
            EventPayload::at(now).book(&book).lease(&expired),
        ),
        now,
    )
    .await?;

    Ok((expired, book))
}

/// Map a partial-unique-index violation to a domain conflict
pub(super) fn unique_violation_as(e: sqlx::Error, kind: ConflictKind, book_id: i32) -> AppError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::Conflict(
            kind,
            format!("Book {} violates a one-per-book constraint ({})", book_id, db.message()),
        ),
        _ => AppError::Database(e),
    }
}
