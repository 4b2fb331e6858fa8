//! Lending transaction engine.
//!
//! Borrow and return run as single ledger transactions that take exactly one
//! row lock each (the book for a borrow, the loan for a return). The engine
//! keeps no state of its own besides the ledger handle, so any number of
//! callers, in any number of processes sharing the store, can use it at once.
//! Nothing is retried here; a `Transaction` error is for the caller to retry.
//!
//! A deadline bounds `begin` and the locked work, never the commit: when a
//! call reports `DeadlineExceeded` its transaction was dropped uncommitted.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    error::{LendingError, StoreError},
    ledger::{Ledger, PgLedger},
    models::{
        book::{BookDetails, CopyCounts},
        Book, Loan, LoanStatus,
    },
};

pub type LendingResult<T> = Result<T, LendingError>;

pub struct LendingService<L: Ledger = PgLedger> {
    ledger: Arc<L>,
    deadline: Option<Duration>,
}

impl<L: Ledger> Clone for LendingService<L> {
    fn clone(&self) -> Self {
        Self {
            ledger: Arc::clone(&self.ledger),
            deadline: self.deadline,
        }
    }
}

impl<L: Ledger> LendingService<L> {
    /// `deadline` bounds every call that does not take its own when set.
    pub fn new(ledger: L, deadline: Option<Duration>) -> Self {
        Self {
            ledger: Arc::new(ledger),
            deadline,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Current available copies, read without locking
    pub async fn availability(&self, book_id: i32) -> LendingResult<i32> {
        self.ledger.get_availability(book_id).await
    }

    /// Lend one copy of `book_id` to `member_id`
    pub async fn borrow(&self, member_id: i32, book_id: i32) -> LendingResult<Loan> {
        self.run_borrow(member_id, book_id, self.deadline).await
    }

    /// Like [`borrow`](Self::borrow) with a caller-supplied deadline. On
    /// expiry the in-flight transaction is dropped, which rolls it back.
    pub async fn borrow_within(
        &self,
        member_id: i32,
        book_id: i32,
        deadline: Duration,
    ) -> LendingResult<Loan> {
        self.run_borrow(member_id, book_id, Some(deadline)).await
    }

    /// Close a loan and put its copy back on the shelf
    pub async fn return_loan(&self, loan_id: i32) -> LendingResult<Loan> {
        self.run_return(loan_id, self.deadline).await
    }

    pub async fn return_within(&self, loan_id: i32, deadline: Duration) -> LendingResult<Loan> {
        self.run_return(loan_id, Some(deadline)).await
    }

    /// Administrative change of a book's total copies.
    ///
    /// Runs under the same book row lock as borrows, so the copies currently
    /// on loan are preserved: `available = total - on_loan`. Requests below
    /// the on-loan count are refused.
    pub async fn set_total_copies(&self, book_id: i32, total_copies: i32) -> LendingResult<CopyCounts> {
        let (tx, staged) = within(self.deadline, async {
            let mut tx = self.ledger.begin().await?;
            let staged = self.resize_in(&mut tx, book_id, total_copies).await;
            Ok::<_, LendingError>((tx, staged))
        })
        .await?;

        let counts = self.finish(tx, staged).await?;
        tracing::info!(
            book_id,
            total_copies = counts.total_copies,
            available_copies = counts.available_copies,
            "Copy count updated"
        );
        Ok(counts)
    }

    /// Update a book's details and total copies in one transaction under the
    /// book row lock. The copy count is only rewritten when it changes.
    pub async fn update_book(
        &self,
        book_id: i32,
        details: &BookDetails,
        total_copies: i32,
    ) -> LendingResult<Book> {
        let (tx, staged) = within(self.deadline, async {
            let mut tx = self.ledger.begin().await?;
            let staged = self.update_in(&mut tx, book_id, details, total_copies).await;
            Ok::<_, LendingError>((tx, staged))
        })
        .await?;

        let book = self.finish(tx, staged).await?;
        tracing::info!(
            book_id,
            total_copies = book.total_copies,
            available_copies = book.available_copies,
            "Book updated"
        );
        Ok(book)
    }

    async fn run_borrow(
        &self,
        member_id: i32,
        book_id: i32,
        deadline: Option<Duration>,
    ) -> LendingResult<Loan> {
        let (tx, staged) = within(deadline, async {
            let mut tx = self.ledger.begin().await?;
            let staged = self.borrow_in(&mut tx, member_id, book_id).await;
            Ok::<_, LendingError>((tx, staged))
        })
        .await?;

        let loan = self.finish(tx, staged).await?;
        tracing::info!(loan_id = loan.id, member_id, book_id, "Book borrowed");
        Ok(loan)
    }

    async fn borrow_in(&self, tx: &mut L::Tx, member_id: i32, book_id: i32) -> LendingResult<Loan> {
        let available = self.ledger.lock_and_get_availability(tx, book_id).await?;
        if available <= 0 {
            return Err(LendingError::InventoryExhausted { book_id });
        }

        self.ledger.decrement_available(tx, book_id).await?;
        self.ledger.insert_loan(tx, member_id, book_id).await
    }

    async fn run_return(&self, loan_id: i32, deadline: Option<Duration>) -> LendingResult<Loan> {
        let (tx, staged) = within(deadline, async {
            let mut tx = self.ledger.begin().await?;
            let staged = self.return_in(&mut tx, loan_id).await;
            Ok::<_, LendingError>((tx, staged))
        })
        .await?;

        let loan = self.finish(tx, staged).await?;
        tracing::info!(loan_id, book_id = loan.book_id, "Book returned");
        Ok(loan)
    }

    async fn return_in(&self, tx: &mut L::Tx, loan_id: i32) -> LendingResult<Loan> {
        let locked = self.ledger.lock_and_get_loan(tx, loan_id).await?;
        if locked.status == LoanStatus::Returned {
            return Err(LendingError::AlreadyReturned { loan_id });
        }

        let loan = self.ledger.mark_returned(tx, loan_id).await?;
        // Every borrowed loan accounts for one decrement, so this stays within total_copies
        self.ledger.increment_available(tx, locked.book_id).await?;
        Ok(loan)
    }

    async fn resize_in(&self, tx: &mut L::Tx, book_id: i32, total_copies: i32) -> LendingResult<CopyCounts> {
        let current = self.ledger.lock_and_get_copy_counts(tx, book_id).await?;
        let resized = current
            .resized(total_copies)
            .ok_or(LendingError::CopyCountBelowOnLoan {
                book_id,
                requested: total_copies,
                on_loan: current.on_loan(),
            })?;

        self.ledger.set_copy_counts(tx, book_id, resized).await?;
        Ok(resized)
    }

    async fn update_in(
        &self,
        tx: &mut L::Tx,
        book_id: i32,
        details: &BookDetails,
        total_copies: i32,
    ) -> LendingResult<Book> {
        let current = self.ledger.lock_and_get_copy_counts(tx, book_id).await?;
        if current.total_copies != total_copies {
            self.resize_in(tx, book_id, total_copies).await?;
        }
        self.ledger.set_book_details(tx, book_id, details).await
    }

    /// Commit staged work, or roll it back when staging failed
    async fn finish<T>(&self, tx: L::Tx, staged: LendingResult<T>) -> LendingResult<T> {
        match staged {
            Ok(value) => {
                self.ledger.commit(tx).await?;
                Ok(value)
            }
            Err(e) => {
                self.abort(tx, &e).await;
                Err(e)
            }
        }
    }

    async fn abort(&self, tx: L::Tx, cause: &LendingError) {
        if cause.is_transient() {
            tracing::warn!(error = %cause, "Lending transaction aborted");
        } else {
            tracing::debug!(error = %cause, "Lending request rejected");
        }

        if let Err(e) = self.ledger.rollback(tx).await {
            tracing::warn!(error = %e, "Rollback failed after aborted lending transaction");
        }
    }
}

async fn within<T, F>(deadline: Option<Duration>, op: F) -> LendingResult<T>
where
    F: Future<Output = LendingResult<T>>,
{
    let Some(deadline) = deadline else {
        return op.await;
    };

    match tokio::time::timeout(deadline, op).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(deadline_ms = deadline.as_millis() as u64, "Lending deadline exceeded");
            Err(StoreError::DeadlineExceeded.into())
        }
    }
}
