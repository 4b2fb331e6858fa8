//! In-process ledger with PostgreSQL-like row locking.
//!
//! Each book and loan row has its own async mutex. A transaction keeps the
//! guards it acquired and a private write set; commit publishes the write set
//! while the guards are still held, drop discards both. Reads outside a
//! transaction see committed state only. A row's lock entry is removed once
//! the last transaction holding or waiting on it is gone.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex as RowMutex, OwnedMutexGuard};

use super::{Ledger, LedgerResult};
use crate::{
    error::{LendingError, StoreError},
    models::{
        book::{BookDetails, CopyCounts},
        loan::LoanLock,
        Book, Loan, LoanStatus,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RowKey {
    Book(i32),
    Loan(i32),
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Book(id) => write!(f, "books.id={}", id),
            RowKey::Loan(id) => write!(f, "loans.id={}", id),
        }
    }
}

#[derive(Default)]
struct Tables {
    members: HashSet<i32>,
    books: HashMap<i32, CopyCounts>,
    details: HashMap<i32, BookDetails>,
    loans: HashMap<i32, Loan>,
}

struct Shared {
    tables: Mutex<Tables>,
    row_locks: Mutex<HashMap<RowKey, Arc<RowMutex<()>>>>,
    next_loan_id: AtomicI32,
    fail_next_commit: AtomicBool,
    commit_delay: Mutex<Option<Duration>>,
    lock_timeout: Option<Duration>,
}

/// Open transaction on a [`MemoryLedger`]
pub struct MemoryTx {
    shared: Arc<Shared>,
    locks: HashMap<RowKey, OwnedMutexGuard<()>>,
    books: HashMap<i32, CopyCounts>,
    details: HashMap<i32, BookDetails>,
    loans: HashMap<i32, Loan>,
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if self.locks.is_empty() {
            return;
        }

        let held: Vec<RowKey> = self.locks.keys().copied().collect();
        self.locks.clear();

        // Waiters clone the entry under this mutex, so a count of one means nobody wants it
        let mut row_locks = self
            .shared
            .row_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for key in held {
            if row_locks.get(&key).is_some_and(|l| Arc::strong_count(l) == 1) {
                row_locks.remove(&key);
            }
        }
    }
}

#[derive(Clone)]
pub struct MemoryLedger {
    shared: Arc<Shared>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Lock waits longer than `timeout` fail with a lock-timeout store error
    pub fn with_lock_timeout(timeout: Duration) -> Self {
        Self::build(Some(timeout))
    }

    fn build(lock_timeout: Option<Duration>) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables::default()),
                row_locks: Mutex::new(HashMap::new()),
                next_loan_id: AtomicI32::new(1),
                fail_next_commit: AtomicBool::new(false),
                commit_delay: Mutex::new(None),
                lock_timeout,
            }),
        }
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.shared
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_member(&self, member_id: i32) {
        self.tables().members.insert(member_id);
    }

    /// Register a book with all `total_copies` available
    pub fn add_book(&self, book_id: i32, total_copies: i32) {
        let mut tables = self.tables();
        tables.books.insert(
            book_id,
            CopyCounts {
                total_copies,
                available_copies: total_copies,
            },
        );
        tables.details.insert(
            book_id,
            BookDetails {
                title: format!("Book {}", book_id),
                author: String::new(),
                published_year: 0,
            },
        );
    }

    /// Make the next commit fail after the transaction did all its work
    pub fn fail_next_commit(&self) {
        self.shared.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Hold the next commit for `delay` before it publishes anything
    pub fn delay_next_commit(&self, delay: Duration) {
        *self
            .shared
            .commit_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    /// Number of rows with a lock entry, held or awaited
    pub fn tracked_row_locks(&self) -> usize {
        self.shared
            .row_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Committed state of a book
    pub fn book(&self, book_id: i32) -> Option<Book> {
        let tables = self.tables();
        let counts = tables.books.get(&book_id)?;
        let details = tables.details.get(&book_id)?;
        Some(book_row(book_id, details, *counts))
    }

    /// Committed counters of a book
    pub fn copy_counts(&self, book_id: i32) -> Option<CopyCounts> {
        self.tables().books.get(&book_id).copied()
    }

    /// Committed state of a loan
    pub fn loan(&self, loan_id: i32) -> Option<Loan> {
        self.tables().loans.get(&loan_id).cloned()
    }

    pub fn loans_for_book(&self, book_id: i32) -> Vec<Loan> {
        let mut loans: Vec<Loan> = self
            .tables()
            .loans
            .values()
            .filter(|l| l.book_id == book_id)
            .cloned()
            .collect();
        loans.sort_by_key(|l| l.id);
        loans
    }

    /// Committed-state invariant violations, empty when the ledger is consistent
    pub fn invariant_violations(&self) -> Vec<String> {
        let tables = self.tables();
        let mut violations = Vec::new();

        for (book_id, counts) in &tables.books {
            if counts.available_copies < 0 || counts.available_copies > counts.total_copies {
                violations.push(format!(
                    "book {}: available {} outside 0..={}",
                    book_id, counts.available_copies, counts.total_copies
                ));
            }

            let borrowed = tables
                .loans
                .values()
                .filter(|l| l.book_id == *book_id && l.status == LoanStatus::Borrowed)
                .count() as i32;
            if borrowed != counts.on_loan() {
                violations.push(format!(
                    "book {}: {} borrowed loans but {} copies out",
                    book_id,
                    borrowed,
                    counts.on_loan()
                ));
            }
        }

        for loan in tables.loans.values() {
            if (loan.status == LoanStatus::Returned) != loan.return_date.is_some() {
                violations.push(format!(
                    "loan {}: status {} with return date {:?}",
                    loan.id, loan.status, loan.return_date
                ));
            }
        }

        violations
    }

    async fn lock_row(&self, tx: &mut MemoryTx, key: RowKey) -> LedgerResult<()> {
        if tx.locks.contains_key(&key) {
            return Ok(());
        }

        let row_lock = {
            let mut locks = self
                .shared
                .row_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let row_lock = locks.entry(key).or_default();
            Arc::clone(row_lock)
        };

        let guard = match self.shared.lock_timeout {
            Some(timeout) => tokio::time::timeout(timeout, row_lock.lock_owned())
                .await
                .map_err(|_| StoreError::LockTimeout {
                    resource: key.to_string(),
                })?,
            None => row_lock.lock_owned().await,
        };

        tx.locks.insert(key, guard);
        Ok(())
    }

    fn read_counts(&self, tx: &MemoryTx, book_id: i32) -> LedgerResult<CopyCounts> {
        if let Some(counts) = tx.books.get(&book_id) {
            return Ok(*counts);
        }
        self.copy_counts(book_id)
            .ok_or_else(|| LendingError::book_not_found(book_id))
    }

    fn read_loan(&self, tx: &MemoryTx, loan_id: i32) -> LedgerResult<Loan> {
        if let Some(loan) = tx.loans.get(&loan_id) {
            return Ok(loan.clone());
        }
        self.loan(loan_id)
            .ok_or_else(|| LendingError::loan_not_found(loan_id))
    }

    /// Stage new counters, enforcing the same range check as the SQL schema
    fn write_counts(tx: &mut MemoryTx, book_id: i32, counts: CopyCounts) -> LedgerResult<()> {
        if counts.available_copies < 0 || counts.available_copies > counts.total_copies {
            return Err(StoreError::Constraint(format!(
                "book {}: available_copies {} outside 0..={}",
                book_id, counts.available_copies, counts.total_copies
            ))
            .into());
        }
        tx.books.insert(book_id, counts);
        Ok(())
    }

    async fn adjust_available(&self, tx: &mut MemoryTx, book_id: i32, delta: i32) -> LedgerResult<()> {
        // An UPDATE locks the row even without a prior locking read
        self.lock_row(tx, RowKey::Book(book_id)).await?;
        let mut counts = self.read_counts(tx, book_id)?;
        counts.available_copies += delta;
        Self::write_counts(tx, book_id, counts)
    }
}

fn book_row(id: i32, details: &BookDetails, counts: CopyCounts) -> Book {
    Book {
        id,
        title: details.title.clone(),
        author: details.author.clone(),
        published_year: details.published_year,
        total_copies: counts.total_copies,
        available_copies: counts.available_copies,
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    type Tx = MemoryTx;

    async fn begin(&self) -> LedgerResult<MemoryTx> {
        Ok(MemoryTx {
            shared: Arc::clone(&self.shared),
            locks: HashMap::new(),
            books: HashMap::new(),
            details: HashMap::new(),
            loans: HashMap::new(),
        })
    }

    async fn commit(&self, mut tx: MemoryTx) -> LedgerResult<()> {
        let delay = self
            .shared
            .commit_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.shared.fail_next_commit.swap(false, Ordering::SeqCst) {
            drop(tx);
            return Err(StoreError::CommitFailed("injected commit failure".to_string()).into());
        }

        {
            let mut tables = self.tables();
            tables.books.extend(std::mem::take(&mut tx.books));
            tables.details.extend(std::mem::take(&mut tx.details));
            tables.loans.extend(std::mem::take(&mut tx.loans));
        }
        // Locks go only after the write set is published
        drop(tx);
        Ok(())
    }

    async fn rollback(&self, tx: MemoryTx) -> LedgerResult<()> {
        drop(tx);
        Ok(())
    }

    async fn get_availability(&self, book_id: i32) -> LedgerResult<i32> {
        self.copy_counts(book_id)
            .map(|c| c.available_copies)
            .ok_or_else(|| LendingError::book_not_found(book_id))
    }

    async fn lock_and_get_availability(&self, tx: &mut MemoryTx, book_id: i32) -> LedgerResult<i32> {
        self.lock_and_get_copy_counts(tx, book_id)
            .await
            .map(|c| c.available_copies)
    }

    async fn lock_and_get_copy_counts(
        &self,
        tx: &mut MemoryTx,
        book_id: i32,
    ) -> LedgerResult<CopyCounts> {
        self.lock_row(tx, RowKey::Book(book_id)).await?;
        self.read_counts(tx, book_id)
    }

    async fn set_copy_counts(
        &self,
        tx: &mut MemoryTx,
        book_id: i32,
        counts: CopyCounts,
    ) -> LedgerResult<()> {
        self.lock_row(tx, RowKey::Book(book_id)).await?;
        self.read_counts(tx, book_id)?;
        Self::write_counts(tx, book_id, counts)
    }

    async fn set_book_details(
        &self,
        tx: &mut MemoryTx,
        book_id: i32,
        details: &BookDetails,
    ) -> LedgerResult<Book> {
        self.lock_row(tx, RowKey::Book(book_id)).await?;
        let counts = self.read_counts(tx, book_id)?;
        tx.details.insert(book_id, details.clone());
        Ok(book_row(book_id, details, counts))
    }

    async fn decrement_available(&self, tx: &mut MemoryTx, book_id: i32) -> LedgerResult<()> {
        self.adjust_available(tx, book_id, -1).await
    }

    async fn increment_available(&self, tx: &mut MemoryTx, book_id: i32) -> LedgerResult<()> {
        self.adjust_available(tx, book_id, 1).await
    }

    async fn insert_loan(&self, tx: &mut MemoryTx, member_id: i32, book_id: i32) -> LedgerResult<Loan> {
        let known_member = self.tables().members.contains(&member_id);
        if !known_member {
            return Err(LendingError::member_not_found(member_id));
        }
        self.read_counts(tx, book_id)?;

        let id = self.shared.next_loan_id.fetch_add(1, Ordering::SeqCst);
        let loan = Loan {
            id,
            member_id,
            book_id,
            borrow_date: Utc::now(),
            return_date: None,
            status: LoanStatus::Borrowed,
        };

        // A fresh row is invisible to others until commit; hold its lock anyway
        self.lock_row(tx, RowKey::Loan(id)).await?;
        tx.loans.insert(id, loan.clone());
        Ok(loan)
    }

    async fn lock_and_get_loan(&self, tx: &mut MemoryTx, loan_id: i32) -> LedgerResult<LoanLock> {
        self.lock_row(tx, RowKey::Loan(loan_id)).await?;
        let loan = self.read_loan(tx, loan_id)?;
        Ok(LoanLock {
            book_id: loan.book_id,
            status: loan.status,
        })
    }

    async fn mark_returned(&self, tx: &mut MemoryTx, loan_id: i32) -> LedgerResult<Loan> {
        self.lock_row(tx, RowKey::Loan(loan_id)).await?;
        let mut loan = self.read_loan(tx, loan_id)?;
        loan.status = LoanStatus::Returned;
        loan.return_date = Some(Utc::now());
        tx.loans.insert(loan_id, loan.clone());
        Ok(loan)
    }
}
