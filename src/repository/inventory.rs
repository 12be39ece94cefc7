//! Inventory repository: books and shelves

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::{
        book::{BookFilter, ShelfScope},
        Book, BookStatus, Shelf,
    },
};

#[derive(Clone)]
pub struct InventoryRepository {
    pool: Pool<Postgres>,
}

impl InventoryRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get book by ID
    pub async fn get_book(&self, id: i32) -> AppResult<Book> {
        sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))
    }

    /// Get shelf by ID
    pub async fn get_shelf(&self, id: i32) -> AppResult<Shelf> {
        sqlx::query_as::<_, Shelf>("SELECT * FROM shelves WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Shelf with id {} not found", id)))
    }

    /// Books matching a mass window and status set, on or off a shelf
    pub async fn find_books(&self, filter: &BookFilter) -> AppResult<Vec<Book>> {
        let (shelf_clause, shelf_id) = match filter.scope {
            ShelfScope::On(id) => ("shelf_id = $1", id),
            ShelfScope::Except(id) => ("shelf_id IS NOT NULL AND shelf_id <> $1", id),
        };
        let statuses: Vec<&str> = filter.statuses.iter().map(|s| s.as_str()).collect();

        let query = format!(
            r#"
            SELECT * FROM books
            WHERE {}
              AND status = ANY($2)
              AND mass BETWEEN $3 AND $4
            ORDER BY updated_at DESC, id
            "#,
            shelf_clause
        );

        let books = sqlx::query_as::<_, Book>(&query)
            .bind(shelf_id)
            .bind(statuses)
            .bind(filter.window.min)
            .bind(filter.window.max)
            .fetch_all(&self.pool)
            .await?;

        Ok(books)
    }
}

/// Lock a book row for the rest of the transaction
pub(super) async fn lock_book(conn: &mut PgConnection, id: i32) -> AppResult<Book> {
    sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))
}

/// Read a book inside the caller's transaction without locking it
pub(super) async fn get_book_in(conn: &mut PgConnection, id: i32) -> AppResult<Book> {
    sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))
}

/// Lock a shelf row for the rest of the transaction
pub(super) async fn lock_shelf(conn: &mut PgConnection, id: i32) -> AppResult<Shelf> {
    sqlx::query_as::<_, Shelf>("SELECT * FROM shelves WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Shelf with id {} not found", id)))
}

pub(super) async fn set_book_status(
    conn: &mut PgConnection,
    id: i32,
    status: BookStatus,
    now: DateTime<Utc>,
) -> AppResult<Book> {
    let book = sqlx::query_as::<_, Book>(
        "UPDATE books SET status = $2, updated_at = $3 WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(status)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;
    Ok(book)
}

pub(super) async fn record_reading(
    conn: &mut PgConnection,
    shelf_id: i32,
    mass: i32,
    observed_at: DateTime<Utc>,
) -> AppResult<Shelf> {
    let shelf = sqlx::query_as::<_, Shelf>(
        "UPDATE shelves SET mass = $2, updated_at = $3 WHERE id = $1 RETURNING *",
    )
    .bind(shelf_id)
    .bind(mass)
    .bind(observed_at)
    .fetch_one(&mut *conn)
    .await?;
    Ok(shelf)
}
