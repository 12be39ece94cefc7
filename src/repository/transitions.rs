//! Atomic application of planned reading transitions

use sqlx::{PgConnection, Pool, Postgres};

use crate::{
    engine::transition::{Effect, Outcome, Transition},
    error::{AppError, AppResult, ConflictKind},
    models::{
        AlertType, BookStatus, EventKind, EventPayload, IssuedRecord, LeaseStatus, NewEvent, Shelf,
    },
};

use super::{alerts, inventory, leases, notifications};

#[derive(Clone)]
pub struct TransitionsRepository {
    pool: Pool<Postgres>,
}

impl TransitionsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Re-check the plan's preconditions under row locks and commit it.
    ///
    /// Lock order is shelf, then lease, then book, then issued record, the
    /// order every unit in the lease repository uses.
    pub async fn apply(&self, transition: &Transition) -> AppResult<Outcome> {
        let mut tx = self.pool.begin().await?;
        let now = transition.now;
        let reading = &transition.reading;

        let shelf = inventory::lock_shelf(&mut tx, reading.shelf_id).await?;
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
                let lease = leases::lock_lease(&mut tx, *lease_id).await?;
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
                let book = inventory::lock_book(&mut tx, *book_id).await?;
                if book.status != BookStatus::Reserved {
                    return Err(AppError::StaleRead(format!(
                        "Book {} is {}, expected reserved",
                        book.id, book.status
                    )));
                }
                if leases::lock_open_record(&mut tx, book.id).await?.is_some() {
                    return Err(AppError::Conflict(
                        ConflictKind::AlreadyIssued,
                        format!("Book {} already has an open issued record", book.id),
                    ));
                }

                let completed = leases::close_lease(&mut tx, lease.id, LeaseStatus::Completed, now).await?;
                let record = sqlx::query_as::<_, IssuedRecord>(
                    r#"
                    INSERT INTO issued_records (book_id, holder_id, lease_id, issued_at, due_at)
                    VALUES ($1, $2, $3, $4, $5)
                    RETURNING *
                    "#,
                )
                .bind(book.id)
                .bind(completed.holder_id)
                .bind(completed.id)
                .bind(now)
                .bind(*due_at)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| leases::unique_violation_as(e, ConflictKind::AlreadyIssued, book.id))?;
                let book = inventory::set_book_status(&mut tx, book.id, BookStatus::Issued, now).await?;

                notifications::insert_event(
                    &mut tx,
                    &NewEvent::new(
                        EventKind::BookIssued,
                        EventPayload::at(now)
                            .shelf(&shelf)
                            .book(&book)
                            .lease(&completed)
                            .record(&record),
                    ),
                    now,
                )
                .await?;

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
                let lease = leases::lock_lease(&mut tx, *lease_id).await?;
                if !lease.is_active() || lease.book_id != *book_id || !lease.is_past_deadline(now) {
                    return Err(AppError::StaleRead(format!(
                        "Lease {} on book {} is no longer an overdue active lease",
                        lease.id, book_id
                    )));
                }
                let book = inventory::lock_book(&mut tx, *book_id).await?;

                let expired = leases::close_lease(&mut tx, lease.id, LeaseStatus::Expired, now).await?;
                let book = leases::release_book(&mut tx, &book, now).await?;
                let alert = alerts::insert(&mut tx, alert, now).await?;

                notifications::insert_event(
                    &mut tx,
                    &NewEvent::new(
                        EventKind::AlertRaised,
                        EventPayload::at(now)
                            .book(&book)
                            .lease(&expired)
                            .shelf(&shelf)
                            .alert(&alert),
                    ),
                    now,
                )
                .await?;

                Outcome::PickupRejected {
                    book_id: book.id,
                    lease_id: Some(expired.id),
                    alert,
                }
            }

            Effect::Return { book_id, record_id } => {
                let has_active_lease = leases::lock_active_lease(&mut tx, *book_id).await?.is_some();
                let book = inventory::lock_book(&mut tx, *book_id).await?;
                let open = leases::lock_open_record(&mut tx, book.id).await?;
                let record = match open {
                    Some(record) if record.id == *record_id => record,
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

                let record = sqlx::query_as::<_, IssuedRecord>(
                    "UPDATE issued_records SET returned_at = $2 WHERE id = $1 RETURNING *",
                )
                .bind(record.id)
                .bind(now)
                .fetch_one(&mut *tx)
                .await?;
                let book = inventory::set_book_status(
                    &mut tx,
                    book.id,
                    BookStatus::derive(has_active_lease, false),
                    now,
                )
                .await?;

                notifications::insert_event(
                    &mut tx,
                    &NewEvent::new(
                        EventKind::BookReturned,
                        EventPayload::at(now).shelf(&shelf).book(&book).record(&record),
                    ),
                    now,
                )
                .await?;

                Outcome::Returned {
                    book_id: book.id,
                    record,
                }
            }

            Effect::Restock { book_id, lease_id } => {
                let lease = leases::lock_lease(&mut tx, *lease_id).await?;
                if !lease.is_active() || lease.book_id != *book_id {
                    return Err(AppError::StaleRead(format!(
                        "Lease {} is no longer active for book {}",
                        lease_id, book_id
                    )));
                }
                let book = inventory::lock_book(&mut tx, *book_id).await?;
                if book.status != BookStatus::Reserved {
                    return Err(AppError::StaleRead(format!(
                        "Book {} is {}, expected reserved",
                        book.id, book.status
                    )));
                }
                let book = inventory::set_book_status(&mut tx, book.id, BookStatus::Reserved, now).await?;

                notifications::insert_event(
                    &mut tx,
                    &NewEvent::new(
                        EventKind::BookRestocked,
                        EventPayload::at(now).shelf(&shelf).book(&book).lease(&lease),
                    ),
                    now,
                )
                .await?;

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
                let alert = alerts::insert(&mut tx, alert, now).await?;
                let mut payload = EventPayload::at(now);
                if let Some(book_id) = alert.book_id {
                    let book = inventory::get_book_in(&mut tx, book_id).await?;
                    payload = payload.book(&book);
                }
                payload = payload.shelf(&shelf).alert(&alert).holder(*holder_id);
                payload.lease_id = *lease_id;

                notifications::insert_event(&mut tx, &NewEvent::new(EventKind::AlertRaised, payload), now).await?;

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

        apply_reading(&mut tx, &shelf, transition).await?;
        tx.commit().await?;
        Ok(outcome)
    }
}

async fn apply_reading(conn: &mut PgConnection, shelf: &Shelf, transition: &Transition) -> AppResult<Shelf> {
    let reading = &transition.reading;
    inventory::record_reading(conn, shelf.id, reading.mass, reading.observed_at).await
}
