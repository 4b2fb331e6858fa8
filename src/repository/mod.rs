//! Repository layer for plain catalog and member database operations.
//!
//! Copy counters and loan state are only written through [`crate::ledger`].

pub mod books;
pub mod loans;
pub mod members;

use sqlx::{Pool, Postgres};

use crate::error::AppError;

/// Main repository struct holding database connection pool
#[derive(Clone)]
pub struct Repository {
    pub pool: Pool<Postgres>,
    pub books: books::BooksRepository,
    pub members: members::MembersRepository,
    pub loans: loans::LoansRepository,
}

impl Repository {
    /// Create a new repository with the given database pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            books: books::BooksRepository::new(pool.clone()),
            members: members::MembersRepository::new(pool.clone()),
            loans: loans::LoansRepository::new(pool.clone()),
            pool,
        }
    }

    /// Round-trip to the database, for readiness checks
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Turn unique and foreign-key violations into a conflict carrying `message`
pub(crate) fn conflict_on_constraint(e: sqlx::Error, message: &str) -> AppError {
    let is_constraint = e
        .as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == "23505" || code == "23503")
        .unwrap_or(false);

    if is_constraint {
        AppError::Conflict(message.to_string())
    } else {
        AppError::Database(e)
    }
}
