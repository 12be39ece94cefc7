//! API integration tests against a running server
//!
//! Needs a migrated database with at least one book and the server started
//! with the same `JWT_SECRET` as the test process.

use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use shelfwatch::models::{Role, UserClaims};

const BASE_URL: &str = "http://localhost:8080/api/v1";

fn bearer(user_id: i32, role: Role) -> String {
    let secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| "change-this-secret-in-production".to_string());
    let now = Utc::now().timestamp();
    UserClaims {
        sub: format!("user-{}", user_id),
        user_id,
        role,
        exp: now + 600,
        iat: now,
    }
    .create_token(&secret)
    .expect("Failed to sign token")
}

fn book_id() -> i32 {
    std::env::var("TEST_BOOK_ID")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1)
}

#[tokio::test]
#[ignore] // Run with: cargo test -- --ignored
async fn test_health_check() {
    let client = Client::new();

    let response = client
        .get(format!("{}/health", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
#[ignore]
async fn test_readiness_check() {
    let client = Client::new();

    let response = client
        .get(format!("{}/ready", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
#[ignore]
async fn test_reservation_requires_token() {
    let client = Client::new();

    let response = client
        .post(format!("{}/reservations", BASE_URL))
        .json(&json!({ "book_id": book_id(), "ttl_secs": 60 }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[ignore]
async fn test_reserve_and_cancel() {
    let client = Client::new();
    let token = bearer(7, Role::Reader);

    let response = client
        .post(format!("{}/reservations", BASE_URL))
        .bearer_auth(&token)
        .json(&json!({ "book_id": book_id(), "ttl_secs": 60 }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::CREATED);

    let lease: Value = response.json().await.expect("Failed to parse response");
    let lease_id = lease["id"].as_i64().expect("No lease id");
    assert_eq!(lease["status"], "active");

    let response = client
        .post(format!("{}/reservations/{}/cancel", BASE_URL, lease_id))
        .bearer_auth(&token)
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), StatusCode::OK);

    let cancelled: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(cancelled["status"], "cancelled");
}

#[tokio::test]
#[ignore]
async fn test_readings_need_staff() {
    let client = Client::new();

    let response = client
        .post(format!("{}/shelves/1/readings", BASE_URL))
        .bearer_auth(bearer(7, Role::Reader))
        .json(&json!({ "mass": 0 }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
#[ignore]
async fn test_list_notifications() {
    let client = Client::new();

    let response = client
        .get(format!("{}/notifications?limit=5", BASE_URL))
        .bearer_auth(bearer(100, Role::Staff))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let body: Value = response.json().await.expect("Failed to parse response");
    assert!(body["items"].is_array());
}
