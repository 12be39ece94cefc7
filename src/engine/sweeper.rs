//! Lease expiry sweeper
//!
//! Competes with the committer for lease rows. Each expiry is its own atomic
//! unit that re-checks status and deadline, so a pickup that committed first
//! turns the expiry into a no-op and a second sweep changes nothing.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tokio::{sync::Notify, task::JoinHandle};
use utoipa::ToSchema;

use crate::{engine::clock::Clock, error::AppResult, repository::Store};

const SWEEP_BATCH: i64 = 500;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct SweepReport {
    /// Active leases found past their deadline
    pub examined: usize,
    /// Leases this run moved to `expired`
    pub expired: usize,
    /// Leases another writer settled first, or whose expiry failed and waits for the next run
    pub skipped: usize,
    /// Expired leases whose book was released back to `available`
    pub released: usize,
}

#[derive(Clone)]
pub struct Sweeper {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    outbox_signal: Arc<Notify>,
}

impl Sweeper {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, outbox_signal: Arc<Notify>) -> Self {
        Self {
            store,
            clock,
            outbox_signal,
        }
    }

    /// Expire every active lease whose deadline has passed
    pub async fn sweep(&self) -> AppResult<SweepReport> {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        loop {
            let due = self.store.due_leases(now, SWEEP_BATCH).await?;
            let batch_len = due.len();
            report.examined += batch_len;

            let mut progressed = false;
            for lease in due {
                match self.store.expire_lease(lease.id, now).await {
                    Ok(Some(expired)) => {
                        progressed = true;
                        report.expired += 1;
                        if expired.released_book {
                            report.released += 1;
                        }
                        tracing::info!(
                            lease_id = lease.id,
                            book_id = lease.book_id,
                            holder_id = lease.holder_id,
                            deadline = %lease.deadline,
                            released_book = expired.released_book,
                            "Reservation expired"
                        );
                    }
                    Ok(None) => {
                        report.skipped += 1;
                        tracing::debug!(lease_id = lease.id, "Lease settled concurrently, skipping");
                    }
                    Err(e) => {
                        report.skipped += 1;
                        tracing::error!(lease_id = lease.id, "Failed to expire lease: {}", e);
                    }
                }
            }

            if (batch_len as i64) < SWEEP_BATCH || !progressed {
                break;
            }
        }

        if report.expired > 0 {
            self.outbox_signal.notify_one();
        }
        Ok(report)
    }

    /// Run `sweep` on a fixed interval until the task is aborted
    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tracing::info!(interval_secs = interval.as_secs(), "Starting lease expiry sweeper");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.sweep().await {
                    Ok(report) if report.expired > 0 => {
                        tracing::info!(expired = report.expired, released = report.released, "Sweep completed")
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!("Lease sweep failed: {}", e),
                }
            }
        })
    }
}
