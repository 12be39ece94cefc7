//! Shelfwatch
//!
//! Reservation and transaction engine for a library whose books sit on
//! weight-instrumented shelves. Pickups and returns are inferred from shelf
//! weight deltas, committed exactly once, and fanned out as notifications to
//! the holder and to staff.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
}

/// Create the application router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_v1 = Router::new()
        // Health check
        .route("/health", get(api::health::health_check))
        .route("/ready", get(api::health::readiness_check))
        // Reservations
        .route("/reservations", post(api::reservations::create_reservation))
        .route("/reservations/:id", get(api::reservations::get_reservation))
        .route("/reservations/:id/cancel", post(api::reservations::cancel_reservation))
        // Access coordinator
        .route("/access-grants", post(api::access::grant_access))
        // Sensor transport
        .route("/shelves/:id/readings", post(api::readings::ingest_reading))
        // Sweeper
        .route("/sweeper/run", post(api::sweeper::run_sweeper))
        // Alerts
        .route("/alerts", get(api::alerts::list_alerts))
        // Notifications
        .route("/notifications", get(api::notifications::list_notifications))
        .route("/notifications/stream", get(api::notifications::stream_notifications))
        .route("/notifications/:id/read", post(api::notifications::mark_read))
        .with_state(state);

    let openapi = api::openapi::create_openapi_router();

    Router::new()
        .nest("/api/v1", api_v1)
        .merge(openapi)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
