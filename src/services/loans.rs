//! Loan queries and the borrow/return entry points used by the API

use crate::{
    error::AppResult,
    models::loan::Loan,
    repository::Repository,
    services::lending::LendingService,
};

#[derive(Clone)]
pub struct LoansService {
    repository: Repository,
    lending: LendingService,
}

impl LoansService {
    pub fn new(repository: Repository, lending: LendingService) -> Self {
        Self { repository, lending }
    }

    pub async fn list_loans(&self, active_only: bool) -> AppResult<Vec<Loan>> {
        self.repository.loans.list(active_only).await
    }

    pub async fn get_loan(&self, id: i32) -> AppResult<Loan> {
        self.repository.loans.get_by_id(id).await
    }

    /// Borrow a book for a member
    pub async fn borrow(&self, member_id: i32, book_id: i32) -> AppResult<Loan> {
        Ok(self.lending.borrow(member_id, book_id).await?)
    }

    /// Return a borrowed book
    pub async fn return_loan(&self, loan_id: i32) -> AppResult<Loan> {
        Ok(self.lending.return_loan(loan_id).await?)
    }
}
