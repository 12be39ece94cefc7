//! Business logic services

pub mod notifications;
pub mod reservations;

use std::{sync::Arc, time::Duration};

use tokio::{sync::Notify, task::JoinHandle};

use crate::{
    config::AppConfig,
    engine::{Clock, Committer, Sweeper},
    error::AppResult,
    repository::{RecipientDirectory, Store},
};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn Store>,
    pub committer: Committer,
    pub sweeper: Sweeper,
    pub reservations: reservations::ReservationsService,
    pub notifications: notifications::NotificationsService,
}

impl Services {
    /// Wire every service onto one store, one clock and one outbox signal
    pub fn new(
        store: Arc<dyn Store>,
        directory: Arc<dyn RecipientDirectory>,
        clock: Arc<dyn Clock>,
        config: &AppConfig,
    ) -> Self {
        let outbox_signal = Arc::new(Notify::new());

        Self {
            committer: Committer::new(
                store.clone(),
                clock.clone(),
                config.engine.clone(),
                outbox_signal.clone(),
            ),
            sweeper: Sweeper::new(store.clone(), clock.clone(), outbox_signal.clone()),
            reservations: reservations::ReservationsService::new(
                store.clone(),
                clock.clone(),
                config.engine.clone(),
                outbox_signal.clone(),
            ),
            notifications: notifications::NotificationsService::new(
                store.clone(),
                directory,
                clock,
                config.notifications.clone(),
                outbox_signal,
            ),
            store,
        }
    }

    pub async fn ping(&self) -> AppResult<()> {
        self.store.ping().await
    }

    /// Start the fan-out worker and, when enabled, the periodic sweeper
    pub fn spawn_workers(&self, config: &AppConfig) -> Vec<JoinHandle<()>> {
        let mut handles = vec![self.notifications.clone().spawn()];
        if config.sweeper.enabled {
            handles.push(
                self.sweeper
                    .clone()
                    .spawn(Duration::from_secs(config.sweeper.interval_secs.max(1))),
            );
        } else {
            tracing::info!("Lease expiry sweeper disabled; leases expire on demand only");
        }
        handles
    }
}
