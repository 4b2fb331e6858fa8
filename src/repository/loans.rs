//! Loans repository: read-only queries over loan records

use sqlx::{Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::loan::Loan,
};

#[derive(Clone)]
pub struct LoansRepository {
    pool: Pool<Postgres>,
}

impl LoansRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get loan by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<Loan> {
        sqlx::query_as::<_, Loan>(
            "SELECT id, member_id, book_id, borrow_date, return_date, status FROM loans WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Loan with id {} not found", id)))
    }

    /// List loans, optionally only those still on loan
    pub async fn list(&self, active_only: bool) -> AppResult<Vec<Loan>> {
        let loans = sqlx::query_as::<_, Loan>(
            r#"
            SELECT id, member_id, book_id, borrow_date, return_date, status
            FROM loans
            WHERE ($1 = FALSE OR status = 'borrowed')
            ORDER BY borrow_date DESC, id DESC
            "#,
        )
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;
        Ok(loans)
    }

    /// Get loans for a member
    pub async fn get_member_loans(&self, member_id: i32, active_only: bool) -> AppResult<Vec<Loan>> {
        let loans = sqlx::query_as::<_, Loan>(
            r#"
            SELECT id, member_id, book_id, borrow_date, return_date, status
            FROM loans
            WHERE member_id = $1 AND ($2 = FALSE OR status = 'borrowed')
            ORDER BY borrow_date DESC, id DESC
            "#,
        )
        .bind(member_id)
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;
        Ok(loans)
    }
}
