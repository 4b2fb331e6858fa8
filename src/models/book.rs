//! Book (catalog entry with copy counters) model and related types

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

/// Book model from database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Book {
    pub id: i32,
    pub title: String,
    pub author: String,
    pub published_year: i32,
    pub total_copies: i32,
    pub available_copies: i32,
}

/// Total and available copies of one book
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow)]
pub struct CopyCounts {
    pub total_copies: i32,
    pub available_copies: i32,
}

impl CopyCounts {
    pub fn on_loan(&self) -> i32 {
        self.total_copies - self.available_copies
    }

    /// New counts for `total` copies, keeping the copies currently on loan.
    /// `None` when fewer copies than are on loan are requested.
    pub fn resized(&self, total: i32) -> Option<CopyCounts> {
        let on_loan = self.on_loan();
        (total >= on_loan).then(|| CopyCounts {
            total_copies: total,
            available_copies: total - on_loan,
        })
    }
}

/// Create book request
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateBook {
    #[validate(length(min = 1, max = 512))]
    pub title: String,
    #[validate(length(min = 1, max = 256))]
    pub author: String,
    #[validate(range(min = -3000, max = 3000))]
    pub published_year: i32,
    #[validate(range(min = 0))]
    pub total_copies: i32,
}

/// Update book request; `total_copies` is applied under the lending row lock
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UpdateBook {
    #[validate(length(min = 1, max = 512))]
    pub title: String,
    #[validate(length(min = 1, max = 256))]
    pub author: String,
    #[validate(range(min = -3000, max = 3000))]
    pub published_year: i32,
    #[validate(range(min = 0))]
    pub total_copies: i32,
}

impl UpdateBook {
    pub fn details(&self) -> BookDetails {
        BookDetails {
            title: self.title.clone(),
            author: self.author.clone(),
            published_year: self.published_year,
        }
    }
}

/// Descriptive fields of a book, without its counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookDetails {
    pub title: String,
    pub author: String,
    pub published_year: i32,
}

/// Point-in-time availability of a book
#[derive(Debug, Serialize, ToSchema)]
pub struct Availability {
    pub book_id: i32,
    pub available_copies: i32,
}
