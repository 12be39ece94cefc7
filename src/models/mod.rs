//! Data models for Shelfwatch

/// Stores a string-like enum in a TEXT column through its `as_str` / `FromStr` pair
macro_rules! text_column {
    ($ty:ty) => {
        impl sqlx::Type<sqlx::Postgres> for $ty {
            fn type_info() -> sqlx::postgres::PgTypeInfo {
                <String as sqlx::Type<sqlx::Postgres>>::type_info()
            }

            fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
                <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
            }
        }

        impl<'r> sqlx::Decode<'r, sqlx::Postgres> for $ty {
            fn decode(
                value: sqlx::postgres::PgValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                let s: String = sqlx::Decode::<sqlx::Postgres>::decode(value)?;
                s.parse().map_err(|e: String| e.into())
            }
        }

        impl sqlx::Encode<'_, sqlx::Postgres> for $ty {
            fn encode_by_ref(
                &self,
                buf: &mut sqlx::postgres::PgArgumentBuffer,
            ) -> sqlx::encode::IsNull {
                <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }
    };
}

pub mod access;
pub mod alert;
pub mod book;
pub mod event;
pub mod lease;
pub mod notification;
pub mod user;

// Re-export commonly used types
pub use access::{AccessGrant, AccessPurpose, GrantOutcome};
pub use alert::{AlertType, NewAlert, ShelfAlert};
pub use book::{Book, BookStatus, Shelf};
pub use event::{EngineEvent, EventKind, EventPayload, NewEvent};
pub use lease::{IssuedRecord, Lease, LeaseStatus, NewLease};
pub use notification::{NewNotification, Notification, NotificationPage, NotificationQuery};
pub use user::{Role, UserClaims};
