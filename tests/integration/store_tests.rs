//! Postgres store tests
//!
//! Need `DATABASE_URL` pointing at a scratch database; migrations are applied
//! on connect. Every test seeds its own shelf and books, so they can share one
//! database and run in parallel.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sqlx::{postgres::PgPoolOptions, Pool, Postgres};

use shelfwatch::{
    config::AppConfig,
    engine::{ManualClock, Outcome},
    error::ConflictKind,
    models::{
        alert::AlertQuery, AlertType, Book, BookStatus, EventKind, LeaseStatus, NewLease,
        NotificationQuery, Role, Shelf, UserClaims,
    },
    repository::{Repository, Store},
    services::Services,
};

const HOLDER: i32 = 9_000_007;
const OTHER_READER: i32 = 9_000_008;
const STAFF: i32 = 9_000_100;

struct Fixture {
    pool: Pool<Postgres>,
    repository: Arc<Repository>,
    clock: Arc<ManualClock>,
    services: Services,
    t0: DateTime<Utc>,
    shelf: Shelf,
}

impl Fixture {
    async fn new() -> Self {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a scratch database");
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .expect("Failed to connect to database");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run migrations");

        for (id, role) in [(HOLDER, Role::Reader), (OTHER_READER, Role::Reader), (STAFF, Role::Staff)] {
            sqlx::query("INSERT INTO users (id, role) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING")
                .bind(id)
                .bind(role)
                .execute(&pool)
                .await
                .expect("Failed to seed user");
        }

        // Whole seconds: the shelf timestamp round-trips through Postgres exactly
        let t0 = DateTime::<Utc>::from_timestamp(Utc::now().timestamp(), 0).expect("valid timestamp");
        let shelf = seed_shelf(&pool, t0).await;

        let repository = Arc::new(Repository::new(pool.clone()));
        let clock = Arc::new(ManualClock::new(t0));
        let services = Services::new(repository.clone(), repository.clone(), clock.clone(), &AppConfig::default());

        Self {
            pool,
            repository,
            clock,
            services,
            t0,
            shelf,
        }
    }

    async fn book(&self, title: &str, mass: i32) -> Book {
        let book = sqlx::query_as::<_, Book>(
            "INSERT INTO books (title, mass, shelf_id, updated_at) VALUES ($1, $2, $3, $4) RETURNING *",
        )
        .bind(title)
        .bind(mass)
        .bind(self.shelf.id)
        .bind(self.t0)
        .fetch_one(&self.pool)
        .await
        .expect("Failed to seed book");

        sqlx::query("UPDATE shelves SET mass = mass + $2 WHERE id = $1")
            .bind(self.shelf.id)
            .bind(mass)
            .execute(&self.pool)
            .await
            .expect("Failed to place book");
        book
    }

    fn advance_to(&self, offset: Duration) -> DateTime<Utc> {
        let now = self.t0 + offset;
        self.clock.set(now);
        now
    }

    async fn mass(&self) -> i32 {
        self.repository.get_shelf(self.shelf.id).await.unwrap().mass
    }
}

async fn seed_shelf(pool: &Pool<Postgres>, at: DateTime<Utc>) -> Shelf {
    let mut tx = pool.begin().await.expect("Failed to begin");
    // Serialise numbering across tests running in parallel
    sqlx::query("LOCK TABLE shelves IN SHARE ROW EXCLUSIVE MODE")
        .execute(&mut *tx)
        .await
        .expect("Failed to lock shelves");
    let shelf = sqlx::query_as::<_, Shelf>(
        r#"
        INSERT INTO shelves (shelf_number, mass, capacity, updated_at)
        VALUES ((SELECT COALESCE(MAX(shelf_number), 0) + 1 FROM shelves), 0, 20000, $1)
        RETURNING *
        "#,
    )
    .bind(at)
    .fetch_one(&mut *tx)
    .await
    .expect("Failed to seed shelf");
    tx.commit().await.expect("Failed to commit");
    shelf
}

fn claims(user_id: i32, role: Role) -> UserClaims {
    let now = Utc::now().timestamp();
    UserClaims {
        sub: format!("user-{}", user_id),
        user_id,
        role,
        exp: now + 600,
        iat: now,
    }
}

#[tokio::test]
#[ignore] // Run with: cargo test --test store_tests -- --ignored
async fn test_reserve_pickup_return() {
    let f = Fixture::new().await;
    let book = f.book("Dune", 300).await;
    let lease = f
        .services
        .reservations
        .create_reservation(book.id, HOLDER, 300)
        .await
        .unwrap();
    assert_eq!(f.repository.get_book(book.id).await.unwrap().status, BookStatus::Reserved);

    let picked_up = f.advance_to(Duration::minutes(1));
    let report = f.services.committer.ingest(f.shelf.id, 0, picked_up).await.unwrap();
    assert!(matches!(report.outcome, Outcome::Issued { lease_id, .. } if lease_id == lease.id));
    assert_eq!(f.repository.get_lease(lease.id).await.unwrap().status, LeaseStatus::Completed);
    assert_eq!(f.repository.get_book(book.id).await.unwrap().status, BookStatus::Issued);

    let returned = f.advance_to(Duration::days(3));
    let report = f.services.committer.ingest(f.shelf.id, 302, returned).await.unwrap();
    assert!(matches!(report.outcome, Outcome::Returned { book_id, .. } if book_id == book.id));

    assert_eq!(f.repository.get_book(book.id).await.unwrap().status, BookStatus::Available);
    let records = f.repository.records_for_book(book.id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].returned_at, Some(returned));
    assert_eq!(f.mass().await, 302);
}

#[tokio::test]
#[ignore]
async fn test_stale_and_duplicate_readings() {
    let f = Fixture::new().await;
    let book = f.book("Dune", 300).await;
    f.services
        .reservations
        .create_reservation(book.id, HOLDER, 300)
        .await
        .unwrap();

    let now = f.advance_to(Duration::minutes(1));
    f.services.committer.ingest(f.shelf.id, 0, now).await.unwrap();

    let duplicate = f.services.committer.ingest(f.shelf.id, 0, now).await.unwrap();
    assert!(matches!(duplicate.outcome, Outcome::Noise));

    let late = f.services.committer.ingest(f.shelf.id, 300, f.t0).await.unwrap();
    assert!(matches!(late.outcome, Outcome::Superseded { .. }));
    assert_eq!(f.repository.records_for_book(book.id).await.unwrap().len(), 1);
}

#[tokio::test]
#[ignore]
async fn test_expiry_and_pickup_at_the_deadline_settle_once() {
    let f = Fixture::new().await;
    let book = f.book("Dune", 300).await;
    let lease = f
        .services
        .reservations
        .create_reservation(book.id, HOLDER, 300)
        .await
        .unwrap();

    let deadline = f.advance_to(Duration::minutes(5));
    let (expired, ingested) = tokio::join!(
        f.repository.expire_lease(lease.id, deadline),
        f.services.committer.ingest(f.shelf.id, 0, deadline),
    );
    let expired = expired.unwrap();
    let report = ingested.unwrap();

    // Whoever commits first, the pickup is refused and the lease ends expired
    assert!(matches!(report.outcome, Outcome::PickupRejected { .. }));
    assert_eq!(f.repository.get_lease(lease.id).await.unwrap().status, LeaseStatus::Expired);
    assert_eq!(f.repository.get_book(book.id).await.unwrap().status, BookStatus::Available);
    assert!(f.repository.open_record(book.id).await.unwrap().is_none());
    if let Some(expired) = expired {
        assert!(expired.released_book);
    }

    let alerts = f
        .repository
        .list_alerts(&AlertQuery {
            shelf_id: Some(f.shelf.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, AlertType::ExpiredPickupAttempt);
}

#[tokio::test]
#[ignore]
async fn test_concurrent_reservations_conflict() {
    let f = Fixture::new().await;
    let book = f.book("Dune", 300).await;

    let lease_for = |holder_id| NewLease {
        book_id: book.id,
        holder_id,
        created_at: f.t0,
        deadline: f.t0 + Duration::minutes(5),
    };
    let holder_lease = lease_for(HOLDER);
    let other_lease = lease_for(OTHER_READER);
    let (first, second) = tokio::join!(
        f.repository.create_lease(&holder_lease),
        f.repository.create_lease(&other_lease),
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let err = results
        .into_iter()
        .find_map(|r| r.err())
        .expect("one reservation must lose");
    assert_eq!(err.conflict_kind(), Some(ConflictKind::AlreadyReserved));
    assert_eq!(f.repository.get_book(book.id).await.unwrap().status, BookStatus::Reserved);
}

#[tokio::test]
#[ignore]
async fn test_cancel_overdue_commits_the_expiry() {
    let f = Fixture::new().await;
    let book = f.book("Dune", 300).await;
    let lease = f
        .services
        .reservations
        .create_reservation(book.id, HOLDER, 300)
        .await
        .unwrap();

    f.advance_to(Duration::minutes(6));
    let err = f
        .services
        .reservations
        .cancel_reservation(lease.id, &claims(HOLDER, Role::Reader))
        .await
        .unwrap_err();

    assert_eq!(err.conflict_kind(), Some(ConflictKind::NotActive));
    assert_eq!(f.repository.get_lease(lease.id).await.unwrap().status, LeaseStatus::Expired);
    assert_eq!(f.repository.get_book(book.id).await.unwrap().status, BookStatus::Available);
}

#[tokio::test]
#[ignore]
async fn test_redelivery_writes_nothing() {
    let f = Fixture::new().await;
    let book = f.book("Dune", 300).await;
    let lease = f
        .services
        .reservations
        .create_reservation(book.id, HOLDER, 300)
        .await
        .unwrap();

    let event = f
        .repository
        .pending_events(10_000)
        .await
        .unwrap()
        .into_iter()
        .find(|e| e.kind == EventKind::ReservationCreated && e.payload.lease_id == Some(lease.id))
        .expect("reservation event in the outbox");

    let first = f.services.notifications.deliver(&event).await.unwrap();
    assert!(first.iter().any(|n| n.recipient_id == HOLDER));
    assert!(first.iter().any(|n| n.recipient_id == STAFF));

    let second = f.services.notifications.deliver(&event).await.unwrap();
    assert!(second.is_empty());

    let query = NotificationQuery {
        limit: Some(NotificationQuery::MAX_LIMIT),
        ..Default::default()
    };
    let page = f.services.notifications.list(HOLDER, &query).await.unwrap();
    assert_eq!(page.items.iter().filter(|n| n.event_id == event.id).count(), 1);
}
