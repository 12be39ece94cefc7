//! Shared fixtures: an in-memory store, a manual clock and the wired services

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use shelfwatch::{
    config::AppConfig,
    engine::ManualClock,
    models::{Book, Role, Shelf},
    repository::MemoryStore,
    services::Services,
};

pub const HOLDER: i32 = 7;
pub const OTHER_READER: i32 = 8;
pub const STAFF: i32 = 100;
pub const ADMIN: i32 = 101;

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub services: Services,
    pub config: AppConfig,
    pub t0: DateTime<Utc>,
    pub shelf1: Shelf,
    pub shelf2: Shelf,
}

impl Harness {
    /// Two empty shelves, one reader, one staff member and one administrator
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let t0 = DateTime::<Utc>::UNIX_EPOCH + Duration::days(20_000);
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(t0));

        let shelf1 = store.add_shelf(1, 0, 20_000, t0);
        let shelf2 = store.add_shelf(2, 0, 20_000, t0);
        store.add_user(HOLDER, Role::Reader);
        store.add_user(OTHER_READER, Role::Reader);
        store.add_user(STAFF, Role::Staff);
        store.add_user(ADMIN, Role::Administrator);

        let services = Services::new(store.clone(), store.clone(), clock.clone(), &config);

        Self {
            store,
            clock,
            services,
            config,
            t0,
            shelf1,
            shelf2,
        }
    }

    pub fn book(&self, title: &str, mass: i32, shelf: &Shelf) -> Book {
        self.store.add_book(title, mass, Some(shelf.id), self.t0)
    }

    /// Current mass of a shelf as the engine last recorded it
    pub async fn shelf_mass(&self, shelf_id: i32) -> i32 {
        use shelfwatch::repository::Store;
        self.store.get_shelf(shelf_id).await.unwrap().mass
    }

    pub fn at(&self, offset: Duration) -> DateTime<Utc> {
        self.t0 + offset
    }

    /// Move the clock to `t0 + offset` and return that instant
    pub fn advance_to(&self, offset: Duration) -> DateTime<Utc> {
        let now = self.at(offset);
        self.clock.set(now);
        now
    }
}
