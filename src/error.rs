//! Error types for Shelfwatch

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Stable numeric error codes returned in every error body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Failure = 1,
    NotAuthorized = 2,
    DbFailure = 3,
    NotFound = 4,
    BadValue = 5,
    AlreadyReserved = 6,
    AlreadyIssued = 7,
    NotActive = 8,
    Duplicate = 9,
    StaleRead = 10,
    NotOwner = 11,
}

/// Which incompatible state a conflicting request ran into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    AlreadyReserved,
    AlreadyIssued,
    NotActive,
    Duplicate,
}

impl From<ConflictKind> for ErrorCode {
    fn from(kind: ConflictKind) -> Self {
        match kind {
            ConflictKind::AlreadyReserved => ErrorCode::AlreadyReserved,
            ConflictKind::AlreadyIssued => ErrorCode::AlreadyIssued,
            ConflictKind::NotActive => ErrorCode::NotActive,
            ConflictKind::Duplicate => ErrorCode::Duplicate,
        }
    }
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Not owner: {0}")]
    NotOwner(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Conflict: {1}")]
    Conflict(ConflictKind, String),

    /// A precondition observed while planning no longer held at commit time
    #[error("Stale read: {0}")]
    StaleRead(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn is_stale_read(&self) -> bool {
        matches!(self, AppError::StaleRead(_))
    }

    pub fn conflict_kind(&self) -> Option<ConflictKind> {
        match self {
            AppError::Conflict(kind, _) => Some(*kind),
            _ => None,
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

/// Error response body
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub code: u32,
    pub error: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Authentication(msg) => {
                (StatusCode::UNAUTHORIZED, ErrorCode::NotAuthorized, msg.clone())
            }
            AppError::Authorization(msg) => {
                (StatusCode::FORBIDDEN, ErrorCode::NotAuthorized, msg.clone())
            }
            AppError::NotOwner(msg) => (StatusCode::FORBIDDEN, ErrorCode::NotOwner, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, ErrorCode::NotFound, msg.clone()),
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, ErrorCode::BadValue, msg.clone())
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::DbFailure,
                    "Database error".to_string(),
                )
            }
            AppError::Conflict(kind, msg) => (StatusCode::CONFLICT, (*kind).into(), msg.clone()),
            AppError::StaleRead(msg) => {
                tracing::warn!("Commit retries exhausted: {}", msg);
                (StatusCode::CONFLICT, ErrorCode::StaleRead, msg.clone())
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::Failure,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            code: code as u32,
            error: format!("{:?}", code),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
