//! Notification fan-out against the in-memory store

mod common;

use std::time::Duration as StdDuration;

use chrono::Duration;

use common::{Harness, ADMIN, HOLDER, OTHER_READER, STAFF};
use shelfwatch::{
    error::AppError,
    models::{EventKind, NotificationQuery},
    repository::Store,
};

#[tokio::test]
async fn reservation_reaches_holder_and_all_staff() {
    let h = Harness::new();
    let book = h.book("Dune", 300, &h.shelf1);
    let lease = h
        .services
        .reservations
        .create_reservation(book.id, HOLDER, 300)
        .await
        .unwrap();

    let written = h.services.notifications.drain().await.unwrap();
    assert_eq!(written, 3);

    let mut metadata = Vec::new();
    for user in [HOLDER, STAFF, ADMIN] {
        let page = h
            .services
            .notifications
            .list(user, &NotificationQuery::default())
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1, "user {}", user);
        let notification = &page.items[0];
        assert_eq!(notification.kind, EventKind::ReservationCreated);
        assert_eq!(notification.title, "Book reserved");
        assert!(notification.body.contains("Dune"));
        assert!(!notification.read);
        metadata.push(notification.metadata.clone());
    }

    // Everyone gets the same facts, enough to render without lookups
    assert!(metadata.iter().all(|m| *m == metadata[0]));
    assert_eq!(metadata[0]["book_id"], book.id);
    assert_eq!(metadata[0]["book_title"], "Dune");
    assert_eq!(metadata[0]["shelf_id"], h.shelf1.id);
    assert_eq!(metadata[0]["lease_id"], lease.id);
    assert_eq!(metadata[0]["event_kind"], "reservation_created");

    let other = h
        .services
        .notifications
        .list(OTHER_READER, &NotificationQuery::default())
        .await
        .unwrap();
    assert!(other.items.is_empty());
}

#[tokio::test]
async fn alert_without_holder_goes_to_staff_only() {
    let h = Harness::new();
    let now = h.advance_to(Duration::minutes(1));
    h.services.committer.ingest(h.shelf2.id, 300, now).await.unwrap();

    assert_eq!(h.services.notifications.drain().await.unwrap(), 2);

    let staff_page = h
        .services
        .notifications
        .list(STAFF, &NotificationQuery::default())
        .await
        .unwrap();
    assert_eq!(staff_page.items[0].kind, EventKind::AlertRaised);
    assert_eq!(staff_page.items[0].title, "Unknown object on shelf");
    assert_eq!(staff_page.items[0].metadata["alert_type"], "unknown_object");
}

#[tokio::test]
async fn redelivery_writes_nothing_new() {
    let h = Harness::new();
    let book = h.book("Dune", 300, &h.shelf1);
    h.services
        .reservations
        .create_reservation(book.id, HOLDER, 300)
        .await
        .unwrap();

    let event = h.store.pending_events(10).await.unwrap().remove(0);
    let first = h.services.notifications.deliver(&event).await.unwrap();
    assert_eq!(first.len(), 3);

    // A worker crashing after the write would hand the same event over again
    let second = h.services.notifications.deliver(&event).await.unwrap();
    assert!(second.is_empty());
    assert!(h.store.pending_events(10).await.unwrap().is_empty());

    let page = h
        .services
        .notifications
        .list(HOLDER, &NotificationQuery::default())
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
}

#[tokio::test]
async fn inbox_pages_newest_first_with_cursor() {
    let h = Harness::new();
    for i in 0..5 {
        let book = h.book(&format!("Volume {}", i), 300 + i * 50, &h.shelf1);
        h.services
            .reservations
            .create_reservation(book.id, HOLDER, 600)
            .await
            .unwrap();
    }
    h.services.notifications.drain().await.unwrap();

    let mut seen = Vec::new();
    let mut cursor = None;
    loop {
        let page = h
            .services
            .notifications
            .list(
                HOLDER,
                &NotificationQuery {
                    cursor,
                    limit: Some(2),
                    ..NotificationQuery::default()
                },
            )
            .await
            .unwrap();
        assert!(page.items.len() <= 2);
        seen.extend(page.items.iter().map(|n| n.id));
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    assert_eq!(seen.len(), 5);
    assert!(seen.windows(2).all(|pair| pair[0] > pair[1]));
}

#[tokio::test]
async fn since_filters_out_older_notifications() {
    let h = Harness::new();
    let first = h.book("Dune", 300, &h.shelf1);
    let second = h.book("Emma", 450, &h.shelf1);

    h.services
        .reservations
        .create_reservation(first.id, HOLDER, 600)
        .await
        .unwrap();
    h.services.notifications.drain().await.unwrap();

    let later = h.advance_to(Duration::minutes(3));
    h.services
        .reservations
        .create_reservation(second.id, HOLDER, 600)
        .await
        .unwrap();
    h.services.notifications.drain().await.unwrap();

    let page = h
        .services
        .notifications
        .list(
            HOLDER,
            &NotificationQuery {
                since: Some(later),
                ..NotificationQuery::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].metadata["book_id"], second.id);
    assert_eq!(page.next_cursor, None);
}

#[tokio::test]
async fn only_the_recipient_can_mark_read() {
    let h = Harness::new();
    let book = h.book("Dune", 300, &h.shelf1);
    h.services
        .reservations
        .create_reservation(book.id, HOLDER, 300)
        .await
        .unwrap();
    h.services.notifications.drain().await.unwrap();

    let mine = h
        .services
        .notifications
        .list(HOLDER, &NotificationQuery::default())
        .await
        .unwrap()
        .items
        .remove(0);

    let err = h.services.notifications.mark_read(mine.id, STAFF).await.unwrap_err();
    assert!(matches!(err, AppError::NotOwner(_)));

    let read = h.services.notifications.mark_read(mine.id, HOLDER).await.unwrap();
    assert!(read.read);
    assert_eq!(read.title, mine.title);

    let err = h.services.notifications.mark_read(99_999, HOLDER).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn worker_pushes_committed_pickups_live() {
    let h = Harness::new();
    let book = h.book("Dune", 300, &h.shelf1);
    let mut live = h.services.notifications.subscribe();
    let workers = h.services.spawn_workers(&h.config);

    h.services
        .reservations
        .create_reservation(book.id, HOLDER, 300)
        .await
        .unwrap();
    let now = h.advance_to(Duration::minutes(1));
    h.services.committer.ingest(h.shelf1.id, 0, now).await.unwrap();

    let mut kinds_for_holder = Vec::new();
    while kinds_for_holder.len() < 2 {
        let notification = tokio::time::timeout(StdDuration::from_secs(5), live.recv())
            .await
            .expect("no notification pushed in time")
            .unwrap();
        if notification.recipient_id == HOLDER {
            kinds_for_holder.push(notification.kind);
        }
    }
    assert_eq!(
        kinds_for_holder,
        vec![EventKind::ReservationCreated, EventKind::BookIssued]
    );

    for worker in workers {
        worker.abort();
    }
}
