//! Members repository for database operations

use sqlx::{Pool, Postgres};

use super::conflict_on_constraint;
use crate::{
    error::{AppError, AppResult},
    models::member::{Member, MemberInput},
};

#[derive(Clone)]
pub struct MembersRepository {
    pool: Pool<Postgres>,
}

impl MembersRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn list(&self) -> AppResult<Vec<Member>> {
        let members = sqlx::query_as::<_, Member>(
            "SELECT id, name, email, joined_at FROM members ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(members)
    }

    /// Get member by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<Member> {
        sqlx::query_as::<_, Member>("SELECT id, name, email, joined_at FROM members WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Member with id {} not found", id)))
    }

    pub async fn create(&self, member: &MemberInput) -> AppResult<Member> {
        sqlx::query_as::<_, Member>(
            r#"
            INSERT INTO members (name, email)
            VALUES ($1, $2)
            RETURNING id, name, email, joined_at
            "#,
        )
        .bind(&member.name)
        .bind(&member.email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| conflict_on_constraint(e, "A member with this email already exists"))
    }

    pub async fn update(&self, id: i32, member: &MemberInput) -> AppResult<Member> {
        sqlx::query_as::<_, Member>(
            r#"
            UPDATE members SET name = $1, email = $2
            WHERE id = $3
            RETURNING id, name, email, joined_at
            "#,
        )
        .bind(&member.name)
        .bind(&member.email)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| conflict_on_constraint(e, "A member with this email already exists"))?
        .ok_or_else(|| AppError::NotFound(format!("Member with id {} not found", id)))
    }

    /// Delete a member. Refused once any loan references them.
    pub async fn delete(&self, id: i32) -> AppResult<Member> {
        sqlx::query_as::<_, Member>(
            "DELETE FROM members WHERE id = $1 RETURNING id, name, email, joined_at",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| conflict_on_constraint(e, "Member has loan records and cannot be deleted"))?
        .ok_or_else(|| AppError::NotFound(format!("Member with id {} not found", id)))
    }
}
