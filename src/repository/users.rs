//! Read-only view of the identity provider's users

use sqlx::{Pool, Postgres};

use crate::error::AppResult;

#[derive(Clone)]
pub struct UsersRepository {
    pool: Pool<Postgres>,
}

impl UsersRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Ids of every staff member and administrator
    pub async fn staff_ids(&self) -> AppResult<Vec<i32>> {
        let ids = sqlx::query_scalar::<_, i32>(
            "SELECT id FROM users WHERE role IN ('staff', 'administrator') ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}
