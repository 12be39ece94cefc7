//! Transaction committer
//!
//! Turns one weight reading into at most one inventory transition. Planning
//! reads a snapshot from the store without locks; `Store::apply` then
//! re-checks every precondition inside its atomic unit. A failed re-check
//! surfaces as `AppError::StaleRead` and the reading is re-planned from fresh
//! state, up to `engine.max_commit_retries` attempts.

use std::{cmp::Ordering, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use utoipa::ToSchema;

use crate::{
    config::{EngineConfig, TieBreak},
    engine::{
        classifier::{classify, Classification},
        clock::Clock,
        transition::{Effect, Outcome, ReadingUpdate, Transition},
    },
    error::{AppError, AppResult},
    models::{
        alert::{AlertType, NewAlert},
        book::{BookFilter, MassWindow, ShelfScope},
        Book, BookStatus, LeaseStatus, Shelf,
    },
    repository::Store,
};

/// Result of ingesting one reading, returned to the sensor transport for diagnostics
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReadingReport {
    pub shelf_id: i32,
    pub previous_mass: i32,
    pub mass: i32,
    pub observed_at: DateTime<Utc>,
    /// Absent when the reading was superseded before classification
    pub classification: Option<Classification>,
    pub outcome: Outcome,
    /// Number of plan/commit attempts it took
    pub attempts: u32,
}

#[derive(Clone)]
pub struct Committer {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    outbox_signal: Arc<Notify>,
}

impl Committer {
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

    /// Classify a reading and commit whatever transition it implies
    pub async fn ingest(
        &self,
        shelf_id: i32,
        mass: i32,
        observed_at: DateTime<Utc>,
    ) -> AppResult<ReadingReport> {
        if mass < 0 {
            return Err(AppError::Validation(format!(
                "Negative mass {} reported for shelf {}",
                mass, shelf_id
            )));
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.attempt(shelf_id, mass, observed_at, attempts).await {
                Ok(report) => {
                    if report.outcome.produced_event() {
                        self.outbox_signal.notify_one();
                    }
                    return Ok(report);
                }
                Err(e) if e.is_stale_read() && attempts < self.config.max_commit_retries => {
                    tracing::debug!(shelf_id, attempts, "Retrying reading after stale read: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(
        &self,
        shelf_id: i32,
        mass: i32,
        observed_at: DateTime<Utc>,
        attempts: u32,
    ) -> AppResult<ReadingReport> {
        let shelf = self.store.get_shelf(shelf_id).await?;
        if !shelf.active {
            return Err(AppError::Validation(format!("Shelf {} is not active", shelf_id)));
        }
        if mass > shelf.capacity {
            tracing::warn!(
                shelf_id,
                mass,
                capacity = shelf.capacity,
                "Reading exceeds shelf capacity"
            );
        }

        if observed_at < shelf.updated_at {
            tracing::debug!(
                shelf_id,
                %observed_at,
                last_observed_at = %shelf.updated_at,
                "Dropping out-of-order reading"
            );
            return Ok(ReadingReport {
                shelf_id,
                previous_mass: shelf.mass,
                mass,
                observed_at,
                classification: None,
                outcome: Outcome::Superseded {
                    last_observed_at: shelf.updated_at,
                },
                attempts,
            });
        }

        let classification = classify(shelf.mass, mass, self.config.noise_floor);
        let now = self.clock.now();
        let effect = self.plan(&shelf, classification, now).await?;
        tracing::debug!(shelf_id, ?classification, effect = effect.name(), "Planned transition");

        let transition = Transition {
            reading: ReadingUpdate {
                shelf_id,
                expected_mass: shelf.mass,
                expected_observed_at: shelf.updated_at,
                mass,
                observed_at,
            },
            effect,
            now,
        };
        let outcome = self.store.apply(&transition).await?;

        match &outcome {
            Outcome::Noise => {}
            Outcome::Anomaly { alert } => tracing::warn!(
                shelf_id,
                alert_id = alert.id,
                alert_type = %alert.alert_type,
                book_id = ?alert.book_id,
                "Shelf anomaly detected"
            ),
            Outcome::PickupRejected { book_id, lease_id, .. } => tracing::warn!(
                shelf_id,
                book_id,
                lease_id = ?lease_id,
                "Pickup attempted after reservation expired"
            ),
            Outcome::UnreservedRemoval { book_id } => tracing::warn!(
                shelf_id,
                book_id,
                "Unreserved book removed; walk-in borrowing is not allowed"
            ),
            other => tracing::info!(shelf_id, outcome = ?other, "Committed shelf transition"),
        }

        Ok(ReadingReport {
            shelf_id,
            previous_mass: shelf.mass,
            mass,
            observed_at,
            classification: Some(classification),
            outcome,
            attempts,
        })
    }

    async fn plan(
        &self,
        shelf: &Shelf,
        classification: Classification,
        now: DateTime<Utc>,
    ) -> AppResult<Effect> {
        match classification {
            Classification::Noise { .. } => Ok(Effect::Noise),
            Classification::CandidateRemoval { delta } => self.plan_removal(shelf, delta, now).await,
            Classification::CandidateAddition { delta } => self.plan_addition(shelf, delta).await,
        }
    }

    async fn plan_removal(&self, shelf: &Shelf, delta: i32, now: DateTime<Utc>) -> AppResult<Effect> {
        let magnitude = delta.saturating_abs();
        let candidates = self
            .store
            .find_books(&BookFilter {
                scope: ShelfScope::On(shelf.id),
                statuses: vec![BookStatus::Reserved, BookStatus::Available],
                window: self.window(magnitude),
            })
            .await?;

        if let Some(book) = pick(&candidates, BookStatus::Reserved, magnitude, self.config.tie_break) {
            let lease = self.store.active_lease(book.id).await?.ok_or_else(|| {
                AppError::StaleRead(format!("Book {} is reserved but has no active lease", book.id))
            })?;

            if lease.is_past_deadline(now) {
                return Ok(Effect::ExpirePickup {
                    book_id: book.id,
                    lease_id: lease.id,
                    alert: NewAlert {
                        shelf_id: shelf.id,
                        alert_type: AlertType::ExpiredPickupAttempt,
                        magnitude: delta,
                        book_id: Some(book.id),
                        expected_shelf_id: None,
                    },
                });
            }

            return Ok(Effect::Issue {
                book_id: book.id,
                lease_id: lease.id,
                due_at: now + Duration::days(self.config.loan_period_days),
            });
        }

        if let Some(book) = pick(&candidates, BookStatus::Available, magnitude, self.config.tie_break) {
            // The sweeper may have expired the lease just before the holder lifted the book
            return match self.store.latest_lease(book.id).await? {
                Some(lease) if lease.status == LeaseStatus::Expired => Ok(Effect::Raise {
                    alert: NewAlert {
                        shelf_id: shelf.id,
                        alert_type: AlertType::ExpiredPickupAttempt,
                        magnitude: delta,
                        book_id: Some(book.id),
                        expected_shelf_id: None,
                    },
                    holder_id: Some(lease.holder_id),
                    lease_id: Some(lease.id),
                }),
                _ => Ok(Effect::UnreservedRemoval { book_id: book.id }),
            };
        }

        self.plan_misplacement(
            shelf,
            delta,
            &[BookStatus::Reserved, BookStatus::Issued],
        )
        .await
    }

    async fn plan_addition(&self, shelf: &Shelf, delta: i32) -> AppResult<Effect> {
        let magnitude = delta.saturating_abs();
        let candidates = self
            .store
            .find_books(&BookFilter {
                scope: ShelfScope::On(shelf.id),
                statuses: vec![BookStatus::Issued, BookStatus::Reserved, BookStatus::Available],
                window: self.window(magnitude),
            })
            .await?;

        if let Some(book) = pick(&candidates, BookStatus::Issued, magnitude, self.config.tie_break) {
            let record = self.store.open_record(book.id).await?.ok_or_else(|| {
                AppError::StaleRead(format!("Book {} is issued but has no open issued record", book.id))
            })?;
            return Ok(Effect::Return {
                book_id: book.id,
                record_id: record.id,
            });
        }

        if let Some(book) = pick(&candidates, BookStatus::Reserved, magnitude, self.config.tie_break) {
            let lease = self.store.active_lease(book.id).await?.ok_or_else(|| {
                AppError::StaleRead(format!("Book {} is reserved but has no active lease", book.id))
            })?;
            return Ok(Effect::Restock {
                book_id: book.id,
                lease_id: lease.id,
            });
        }

        if let Some(book) = pick(&candidates, BookStatus::Available, magnitude, self.config.tie_break) {
            return Ok(Effect::Replaced { book_id: book.id });
        }

        self.plan_misplacement(
            shelf,
            delta,
            &[BookStatus::Issued, BookStatus::Reserved],
        )
        .await
    }

    /// No match on the reporting shelf: look for the book elsewhere (read-only,
    /// no cross-shelf locks) and raise the matching anomaly.
    async fn plan_misplacement(
        &self,
        shelf: &Shelf,
        delta: i32,
        preference: &[BookStatus],
    ) -> AppResult<Effect> {
        let magnitude = delta.saturating_abs();
        let elsewhere = self
            .store
            .find_books(&BookFilter {
                scope: ShelfScope::Except(shelf.id),
                statuses: preference.to_vec(),
                window: self.window(magnitude),
            })
            .await?;

        let misplaced = preference
            .iter()
            .find_map(|status| pick(&elsewhere, *status, magnitude, self.config.tie_break));

        let Some(book) = misplaced else {
            return Ok(Effect::Raise {
                alert: NewAlert {
                    shelf_id: shelf.id,
                    alert_type: AlertType::UnknownObject,
                    magnitude: delta,
                    book_id: None,
                    expected_shelf_id: None,
                },
                holder_id: None,
                lease_id: None,
            });
        };

        let (holder_id, lease_id) = self.current_holder(book).await?;
        Ok(Effect::Raise {
            alert: NewAlert {
                shelf_id: shelf.id,
                alert_type: AlertType::WrongShelf,
                magnitude: delta,
                book_id: Some(book.id),
                expected_shelf_id: book.shelf_id,
            },
            holder_id,
            lease_id,
        })
    }

    /// The user currently entitled to the book, if any, and the lease behind it
    async fn current_holder(&self, book: &Book) -> AppResult<(Option<i32>, Option<i32>)> {
        match book.status {
            BookStatus::Issued => Ok(self
                .store
                .open_record(book.id)
                .await?
                .map(|r| (Some(r.holder_id), r.lease_id))
                .unwrap_or((None, None))),
            BookStatus::Reserved => Ok(self
                .store
                .active_lease(book.id)
                .await?
                .map(|l| (Some(l.holder_id), Some(l.id)))
                .unwrap_or((None, None))),
            BookStatus::Available => Ok((None, None)),
        }
    }

    fn window(&self, magnitude: i32) -> MassWindow {
        MassWindow::around(magnitude, self.config.tolerance)
    }
}

/// Deterministically choose among candidates of one status.
///
/// The configured tie-break orders first, the other criterion second, and the
/// book id last so equal candidates always resolve the same way.
pub fn pick(candidates: &[Book], status: BookStatus, magnitude: i32, tie_break: TieBreak) -> Option<&Book> {
    candidates
        .iter()
        .filter(|b| b.status == status)
        .min_by(|a, b| rank(a, b, magnitude, tie_break))
}

fn rank(a: &Book, b: &Book, magnitude: i32, tie_break: TieBreak) -> Ordering {
    let newest_first = b.updated_at.cmp(&a.updated_at);
    let closest_first = (a.mass - magnitude).abs().cmp(&(b.mass - magnitude).abs());
    let primary = match tie_break {
        TieBreak::MostRecentlyUpdated => newest_first.then(closest_first),
        TieBreak::ClosestMass => closest_first.then(newest_first),
    };
    primary.then(a.id.cmp(&b.id))
}
