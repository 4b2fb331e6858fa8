//! Books repository for catalog database operations

use sqlx::{Pool, Postgres};

use super::conflict_on_constraint;
use crate::{
    error::{AppError, AppResult},
    models::book::{Book, CreateBook},
};

const BOOK_COLUMNS: &str = "id, title, author, published_year, total_copies, available_copies";

#[derive(Clone)]
pub struct BooksRepository {
    pool: Pool<Postgres>,
}

impl BooksRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// List all books ordered by title
    pub async fn list(&self) -> AppResult<Vec<Book>> {
        let query = format!("SELECT {} FROM books ORDER BY title, id", BOOK_COLUMNS);
        let books = sqlx::query_as::<_, Book>(&query)
            .fetch_all(&self.pool)
            .await?;
        Ok(books)
    }

    /// Get book by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<Book> {
        let query = format!("SELECT {} FROM books WHERE id = $1", BOOK_COLUMNS);
        sqlx::query_as::<_, Book>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))
    }

    /// Create a book with every copy available
    pub async fn create(&self, book: &CreateBook) -> AppResult<Book> {
        let query = format!(
            r#"
            INSERT INTO books (title, author, published_year, total_copies, available_copies)
            VALUES ($1, $2, $3, $4, $4)
            RETURNING {}
            "#,
            BOOK_COLUMNS
        );

        let created = sqlx::query_as::<_, Book>(&query)
            .bind(&book.title)
            .bind(&book.author)
            .bind(book.published_year)
            .bind(book.total_copies)
            .fetch_one(&self.pool)
            .await?;
        Ok(created)
    }

    /// Delete a book. Refused once any loan references it.
    pub async fn delete(&self, id: i32) -> AppResult<Book> {
        let query = format!("DELETE FROM books WHERE id = $1 RETURNING {}", BOOK_COLUMNS);

        sqlx::query_as::<_, Book>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| conflict_on_constraint(e, "Book has loan records and cannot be deleted"))?
            .ok_or_else(|| AppError::NotFound(format!("Book with id {} not found", id)))
    }
}
