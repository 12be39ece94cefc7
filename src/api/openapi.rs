//! OpenAPI documentation

use axum::Router;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{access, alerts, health, notifications, readings, reservations, sweeper};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Shelfwatch API",
        version = "1.0.0",
        description = "Reservation and transaction engine for weight-instrumented library shelves",
        license(name = "AGPL-3.0", url = "https://www.gnu.org/licenses/agpl-3.0.html")
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Reservations
        reservations::create_reservation,
        reservations::get_reservation,
        reservations::cancel_reservation,
        // Access
        access::grant_access,
        // Readings
        readings::ingest_reading,
        // Sweeper
        sweeper::run_sweeper,
        // Alerts
        alerts::list_alerts,
        // Notifications
        notifications::list_notifications,
        notifications::mark_read,
        notifications::stream_notifications,
    ),
    components(
        schemas(
            // Reservations
            reservations::CreateReservationRequest,
            crate::models::Lease,
            crate::models::LeaseStatus,
            crate::models::IssuedRecord,
            // Access
            crate::models::AccessGrant,
            crate::models::AccessPurpose,
            crate::models::GrantOutcome,
            // Readings
            readings::ReadingRequest,
            crate::engine::ReadingReport,
            crate::engine::Classification,
            crate::engine::Outcome,
            // Sweeper
            crate::engine::SweepReport,
            // Alerts
            crate::models::ShelfAlert,
            crate::models::AlertType,
            // Notifications
            crate::models::Notification,
            crate::models::NotificationPage,
            crate::models::EventKind,
            // Health
            health::HealthResponse,
            health::ReadinessResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "reservations", description = "Book reservations (leases)"),
        (name = "access", description = "Access coordinator grants"),
        (name = "readings", description = "Shelf weight readings"),
        (name = "sweeper", description = "Lease expiry"),
        (name = "alerts", description = "Shelf anomalies"),
        (name = "notifications", description = "Per-user notification inbox")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
