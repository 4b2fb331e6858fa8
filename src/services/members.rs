//! Member management service

use crate::{
    error::AppResult,
    models::{
        loan::Loan,
        member::{Member, MemberInput},
    },
    repository::Repository,
};

#[derive(Clone)]
pub struct MembersService {
    repository: Repository,
}

impl MembersService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    pub async fn list_members(&self) -> AppResult<Vec<Member>> {
        self.repository.members.list().await
    }

    pub async fn get_member(&self, id: i32) -> AppResult<Member> {
        self.repository.members.get_by_id(id).await
    }

    pub async fn create_member(&self, member: MemberInput) -> AppResult<Member> {
        self.repository.members.create(&member).await
    }

    pub async fn update_member(&self, id: i32, member: MemberInput) -> AppResult<Member> {
        self.repository.members.update(id, &member).await
    }

    pub async fn delete_member(&self, id: i32) -> AppResult<Member> {
        self.repository.members.delete(id).await
    }

    /// Get loans for a member
    pub async fn get_member_loans(&self, member_id: i32, active_only: bool) -> AppResult<Vec<Loan>> {
        // Verify member exists
        self.repository.members.get_by_id(member_id).await?;
        self.repository.loans.get_member_loans(member_id, active_only).await
    }
}
