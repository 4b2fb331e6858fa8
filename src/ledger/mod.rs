//! Inventory ledger: copy counters and loan records.
//!
//! Every mutating operation takes the caller's transaction explicitly. The
//! `lock_*` reads hold an exclusive row lock until that transaction commits or
//! rolls back, which is what serializes concurrent borrows of the same book
//! and concurrent returns of the same loan. Dropping a transaction without
//! committing it rolls it back.
//!
//! Two implementations share the contract: [`PgLedger`] over PostgreSQL
//! (`SELECT ... FOR UPDATE`) and [`MemoryLedger`], an in-process store with
//! the same per-row locking used by tests.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::{
    error::LendingError,
    models::{
        book::{BookDetails, CopyCounts},
        loan::LoanLock,
        Book, Loan,
    },
};

pub use memory::MemoryLedger;
pub use postgres::PgLedger;

pub type LedgerResult<T> = Result<T, LendingError>;

#[cfg_attr(test, mockall::automock(type Tx = ();))]
#[async_trait]
pub trait Ledger: Send + Sync + 'static {
    /// Open transaction; rolls back when dropped uncommitted
    type Tx: Send;

    async fn begin(&self) -> LedgerResult<Self::Tx>;

    async fn commit(&self, tx: Self::Tx) -> LedgerResult<()>;

    async fn rollback(&self, tx: Self::Tx) -> LedgerResult<()>;

    /// Non-locking point-in-time read, for display
    async fn get_availability(&self, book_id: i32) -> LedgerResult<i32>;

    /// Read `available_copies` holding the book row lock for the rest of `tx`
    async fn lock_and_get_availability(&self, tx: &mut Self::Tx, book_id: i32)
        -> LedgerResult<i32>;

    /// Read both counters holding the book row lock for the rest of `tx`
    async fn lock_and_get_copy_counts(
        &self,
        tx: &mut Self::Tx,
        book_id: i32,
    ) -> LedgerResult<CopyCounts>;

    async fn set_copy_counts(
        &self,
        tx: &mut Self::Tx,
        book_id: i32,
        counts: CopyCounts,
    ) -> LedgerResult<()>;

    /// Write title, author and year, returning the whole row as seen by `tx`
    async fn set_book_details(
        &self,
        tx: &mut Self::Tx,
        book_id: i32,
        details: &BookDetails,
    ) -> LedgerResult<Book>;

    async fn decrement_available(&self, tx: &mut Self::Tx, book_id: i32) -> LedgerResult<()>;

    async fn increment_available(&self, tx: &mut Self::Tx, book_id: i32) -> LedgerResult<()>;

    /// Create a `borrowed` loan stamped with the current time
    async fn insert_loan(
        &self,
        tx: &mut Self::Tx,
        member_id: i32,
        book_id: i32,
    ) -> LedgerResult<Loan>;

    /// Read a loan's book and status holding the loan row lock for the rest of `tx`
    async fn lock_and_get_loan(&self, tx: &mut Self::Tx, loan_id: i32) -> LedgerResult<LoanLock>;

    /// Set a loan `returned` and stamp the return time. The caller has
    /// checked under lock that the loan is still `borrowed`.
    async fn mark_returned(&self, tx: &mut Self::Tx, loan_id: i32) -> LedgerResult<Loan>;
}
