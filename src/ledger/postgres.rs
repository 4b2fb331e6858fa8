//! PostgreSQL ledger

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Transaction};

use super::{Ledger, LedgerResult};
use crate::{
    error::{LendingError, StoreError},
    models::{
        book::{BookDetails, CopyCounts},
        loan::LoanLock,
        Book, Loan,
    },
};

const LOAN_COLUMNS: &str = "id, member_id, book_id, borrow_date, return_date, status";
const BOOK_COLUMNS: &str = "id, title, author, published_year, total_copies, available_copies";

#[derive(Clone)]
pub struct PgLedger {
    pool: Pool<Postgres>,
    lock_timeout: Option<Duration>,
}

impl PgLedger {
    pub fn new(pool: Pool<Postgres>, lock_timeout: Option<Duration>) -> Self {
        Self { pool, lock_timeout }
    }
}

/// Maps a foreign-key failure on `loans.member_id` to a missing member.
fn missing_member(e: sqlx::Error, member_id: i32) -> LendingError {
    let is_member_fk = e
        .as_database_error()
        .map(|db| db.code().as_deref() == Some("23503") && db.constraint() == Some("loans_member_id_fkey"))
        .unwrap_or(false);

    if is_member_fk {
        LendingError::member_not_found(member_id)
    } else {
        e.into()
    }
}

#[async_trait]
impl Ledger for PgLedger {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self) -> LedgerResult<Self::Tx> {
        let mut tx = self.pool.begin().await?;

        if let Some(timeout) = self.lock_timeout {
            // SET does not accept bind parameters
            let stmt = format!("SET LOCAL lock_timeout = {}", timeout.as_millis());
            sqlx::query(&stmt).execute(&mut *tx).await?;
        }

        Ok(tx)
    }

    async fn commit(&self, tx: Self::Tx) -> LedgerResult<()> {
        tx.commit()
            .await
            .map_err(|e| StoreError::CommitFailed(e.to_string()).into())
    }

    async fn rollback(&self, tx: Self::Tx) -> LedgerResult<()> {
        tx.rollback().await?;
        Ok(())
    }

    async fn get_availability(&self, book_id: i32) -> LedgerResult<i32> {
        sqlx::query_scalar::<_, i32>("SELECT available_copies FROM books WHERE id = $1")
            .bind(book_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LendingError::book_not_found(book_id))
    }

    async fn lock_and_get_availability(
        &self,
        tx: &mut Self::Tx,
        book_id: i32,
    ) -> LedgerResult<i32> {
        sqlx::query_scalar::<_, i32>(
            "SELECT available_copies FROM books WHERE id = $1 FOR UPDATE",
        )
        .bind(book_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| LendingError::book_not_found(book_id))
    }

    async fn lock_and_get_copy_counts(
        &self,
        tx: &mut Self::Tx,
        book_id: i32,
    ) -> LedgerResult<CopyCounts> {
        sqlx::query_as::<_, CopyCounts>(
            "SELECT total_copies, available_copies FROM books WHERE id = $1 FOR UPDATE",
        )
        .bind(book_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| LendingError::book_not_found(book_id))
    }

    async fn set_copy_counts(
        &self,
        tx: &mut Self::Tx,
        book_id: i32,
        counts: CopyCounts,
    ) -> LedgerResult<()> {
        let result = sqlx::query(
            "UPDATE books SET total_copies = $1, available_copies = $2 WHERE id = $3",
        )
        .bind(counts.total_copies)
        .bind(counts.available_copies)
        .bind(book_id)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LendingError::book_not_found(book_id));
        }
        Ok(())
    }

    async fn set_book_details(
        &self,
        tx: &mut Self::Tx,
        book_id: i32,
        details: &BookDetails,
    ) -> LedgerResult<Book> {
        let query = format!(
            "UPDATE books SET title = $1, author = $2, published_year = $3 WHERE id = $4 RETURNING {}",
            BOOK_COLUMNS
        );

        sqlx::query_as::<_, Book>(&query)
            .bind(&details.title)
            .bind(&details.author)
            .bind(details.published_year)
            .bind(book_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| LendingError::book_not_found(book_id))
    }

    async fn decrement_available(&self, tx: &mut Self::Tx, book_id: i32) -> LedgerResult<()> {
        let result =
            sqlx::query("UPDATE books SET available_copies = available_copies - 1 WHERE id = $1")
                .bind(book_id)
                .execute(&mut **tx)
                .await?;

        if result.rows_affected() == 0 {
            return Err(LendingError::book_not_found(book_id));
        }
        Ok(())
    }

    async fn increment_available(&self, tx: &mut Self::Tx, book_id: i32) -> LedgerResult<()> {
        let result =
            sqlx::query("UPDATE books SET available_copies = available_copies + 1 WHERE id = $1")
                .bind(book_id)
                .execute(&mut **tx)
                .await?;

        if result.rows_affected() == 0 {
            return Err(LendingError::book_not_found(book_id));
        }
        Ok(())
    }

    async fn insert_loan(
        &self,
        tx: &mut Self::Tx,
        member_id: i32,
        book_id: i32,
    ) -> LedgerResult<Loan> {
        let query = format!(
            "INSERT INTO loans (member_id, book_id, status) VALUES ($1, $2, 'borrowed') RETURNING {}",
            LOAN_COLUMNS
        );

        sqlx::query_as::<_, Loan>(&query)
            .bind(member_id)
            .bind(book_id)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| missing_member(e, member_id))
    }

    async fn lock_and_get_loan(&self, tx: &mut Self::Tx, loan_id: i32) -> LedgerResult<LoanLock> {
        sqlx::query_as::<_, LoanLock>("SELECT book_id, status FROM loans WHERE id = $1 FOR UPDATE")
            .bind(loan_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| LendingError::loan_not_found(loan_id))
    }

    async fn mark_returned(&self, tx: &mut Self::Tx, loan_id: i32) -> LedgerResult<Loan> {
        let query = format!(
            "UPDATE loans SET status = 'returned', return_date = CURRENT_TIMESTAMP \
             WHERE id = $1 RETURNING {}",
            LOAN_COLUMNS
        );

        sqlx::query_as::<_, Loan>(&query)
            .bind(loan_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| LendingError::loan_not_found(loan_id))
    }
}
