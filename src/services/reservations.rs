//! Reservation management service

use std::sync::Arc;

use chrono::Duration;
use tokio::sync::Notify;

use crate::{
    config::EngineConfig,
    engine::Clock,
    error::{AppError, AppResult},
    models::{AccessGrant, AccessPurpose, GrantOutcome, Lease, NewLease, UserClaims},
    repository::Store,
};

#[derive(Clone)]
pub struct ReservationsService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    outbox_signal: Arc<Notify>,
}

impl ReservationsService {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
        outbox_signal: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            outbox_signal,
        }
    }

    /// Hold a book for `holder_id` during `ttl_secs` seconds
    pub async fn create_reservation(&self, book_id: i32, holder_id: i32, ttl_secs: i64) -> AppResult<Lease> {
        if ttl_secs <= 0 || ttl_secs > self.config.max_reservation_ttl_secs {
            return Err(AppError::Validation(format!(
                "Reservation ttl must be between 1 and {} seconds, got {}",
                self.config.max_reservation_ttl_secs, ttl_secs
            )));
        }

        let now = self.clock.now();
        let lease = self
            .store
            .create_lease(&NewLease {
                book_id,
                holder_id,
                created_at: now,
                deadline: now + Duration::seconds(ttl_secs),
            })
            .await?;

        tracing::info!(
            lease_id = lease.id,
            book_id,
            holder_id,
            deadline = %lease.deadline,
            "Reservation created"
        );
        self.outbox_signal.notify_one();
        Ok(lease)
    }

    /// Cancel a reservation on behalf of its holder or a staff member
    pub async fn cancel_reservation(&self, lease_id: i32, actor: &UserClaims) -> AppResult<Lease> {
        let lease = self.store.get_lease(lease_id).await?;
        if lease.holder_id != actor.user_id && !actor.is_staff() {
            return Err(AppError::NotOwner(format!(
                "Lease {} belongs to user {}, not user {}",
                lease.id, lease.holder_id, actor.user_id
            )));
        }

        let result = self.store.cancel_lease(lease_id, self.clock.now()).await;
        // An overdue lease is expired and committed even though the call fails
        self.outbox_signal.notify_one();

        let cancelled = result?;
        tracing::info!(
            lease_id,
            book_id = cancelled.book_id,
            actor_id = actor.user_id,
            "Reservation cancelled"
        );
        Ok(cancelled)
    }

    pub async fn get_reservation(&self, lease_id: i32, actor: &UserClaims) -> AppResult<Lease> {
        let lease = self.store.get_lease(lease_id).await?;
        actor.require_self_or_staff(lease.holder_id)?;
        Ok(lease)
    }

    /// Turn an access grant into lease state.
    ///
    /// A pickup grant reserves the book for the user until `valid_until`, or
    /// pushes back the deadline of the user's own lease. Return grants only
    /// get logged: the return itself is detected from the shelf reading.
    pub async fn grant_access(&self, grant: &AccessGrant) -> AppResult<GrantOutcome> {
        let now = self.clock.now();
        let book = self.store.get_book(grant.book_id).await?;
        if book.shelf_id != Some(grant.shelf_id) {
            tracing::warn!(
                book_id = book.id,
                book_shelf_id = ?book.shelf_id,
                grant_shelf_id = grant.shelf_id,
                "Access grant names a shelf the book is not on"
            );
        }

        match grant.purpose {
            AccessPurpose::Return => {
                tracing::info!(
                    user_id = grant.user_id,
                    book_id = grant.book_id,
                    shelf_id = grant.shelf_id,
                    valid_until = %grant.valid_until,
                    "Return access granted"
                );
                Ok(GrantOutcome::Acknowledged)
            }
            AccessPurpose::Pickup => {
                if grant.valid_until <= now {
                    return Err(AppError::Validation(format!(
                        "Access grant for book {} is already past valid_until {}",
                        grant.book_id, grant.valid_until
                    )));
                }

                let existing = self.store.active_lease(grant.book_id).await?;
                if let Some(lease) = existing.filter(|l| l.holder_id == grant.user_id && !l.is_past_deadline(now)) {
                    let lease = self.store.extend_lease(lease.id, grant.valid_until, now).await?;
                    tracing::info!(
                        lease_id = lease.id,
                        user_id = grant.user_id,
                        deadline = %lease.deadline,
                        "Lease extended by pickup grant"
                    );
                    return Ok(GrantOutcome::Extended { lease });
                }

                let lease = self
                    .store
                    .create_lease(&NewLease {
                        book_id: grant.book_id,
                        holder_id: grant.user_id,
                        created_at: now,
                        deadline: grant.valid_until,
                    })
                    .await?;
                self.outbox_signal.notify_one();
                tracing::info!(
                    lease_id = lease.id,
                    user_id = grant.user_id,
                    deadline = %lease.deadline,
                    "Lease created from pickup grant"
                );
                Ok(GrantOutcome::Reserved { lease })
            }
        }
    }
}
