//! Error types for the lending server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Numeric error codes carried in every error response body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Failure = 1,
    NotAuthorized = 2,
    DbFailure = 3,
    NoSuchMember = 4,
    NoSuchBook = 5,
    NoSuchLoan = 6,
    BookNotAvailable = 7,
    Duplicate = 8,
    AlreadyReturned = 9,
    TransactionFailure = 10,
    BadValue = 18,
}

/// Store-level failure underneath a lending transaction.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("timed out waiting for lock on {resource}")]
    LockTimeout { resource: String },

    #[error("deadline exceeded before the transaction completed")]
    DeadlineExceeded,

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("commit failed: {0}")]
    CommitFailed(String),
}

/// Failure kinds of the lending transaction engine.
///
/// Callers branch on the variant; none of them is retried by the engine.
#[derive(Error, Debug)]
pub enum LendingError {
    #[error("{entity} with id {id} not found")]
    NotFound { entity: &'static str, id: i32 },

    #[error("No copies of book {book_id} are available")]
    InventoryExhausted { book_id: i32 },

    #[error("Loan {loan_id} has already been returned")]
    AlreadyReturned { loan_id: i32 },

    #[error("Cannot set total copies of book {book_id} to {requested}: {on_loan} copies are on loan")]
    CopyCountBelowOnLoan {
        book_id: i32,
        requested: i32,
        on_loan: i32,
    },

    #[error("Transaction failed: {0}")]
    Transaction(#[from] StoreError),
}

impl LendingError {
    pub fn book_not_found(id: i32) -> Self {
        LendingError::NotFound { entity: "Book", id }
    }

    pub fn loan_not_found(id: i32) -> Self {
        LendingError::NotFound { entity: "Loan", id }
    }

    pub fn member_not_found(id: i32) -> Self {
        LendingError::NotFound { entity: "Member", id }
    }

    /// True for store-level failures a caller may choose to retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, LendingError::Transaction(_))
    }
}

impl From<sqlx::Error> for LendingError {
    fn from(e: sqlx::Error) -> Self {
        let code = e
            .as_database_error()
            .and_then(|db| db.code())
            .map(|code| code.into_owned());

        let store = match code.as_deref() {
            // lock_not_available, raised once lock_timeout elapses
            Some("55P03") => StoreError::LockTimeout {
                resource: "row".to_string(),
            },
            // check_violation
            Some("23514") => StoreError::Constraint(e.to_string()),
            _ => StoreError::Database(e),
        };
        LendingError::Transaction(store)
    }
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Lending(#[from] LendingError),
}

impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::Validation(e.to_string())
    }
}

/// Error response body
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub code: u32,
    pub error: String,
    pub message: String,
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, ErrorCode, String) {
        match self {
            AppError::Authentication(msg) => {
                (StatusCode::UNAUTHORIZED, ErrorCode::NotAuthorized, msg.clone())
            }
            AppError::Authorization(msg) => {
                (StatusCode::FORBIDDEN, ErrorCode::NotAuthorized, msg.clone())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, ErrorCode::Failure, msg.clone()),
            AppError::Validation(msg) | AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, ErrorCode::BadValue, msg.clone())
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::DbFailure,
                    "Database error".to_string(),
                )
            }
            AppError::Conflict(msg) => (StatusCode::CONFLICT, ErrorCode::Duplicate, msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::Failure,
                    "Internal server error".to_string(),
                )
            }
            AppError::Lending(e) => lending_status(e),
        }
    }
}

fn lending_status(e: &LendingError) -> (StatusCode, ErrorCode, String) {
    let code = match e {
        LendingError::NotFound { entity: "Member", .. } => ErrorCode::NoSuchMember,
        LendingError::NotFound { entity: "Loan", .. } => ErrorCode::NoSuchLoan,
        LendingError::NotFound { .. } => ErrorCode::NoSuchBook,
        LendingError::InventoryExhausted { .. } => ErrorCode::BookNotAvailable,
        LendingError::AlreadyReturned { .. } => ErrorCode::AlreadyReturned,
        LendingError::CopyCountBelowOnLoan { .. } => ErrorCode::BadValue,
        LendingError::Transaction(_) => ErrorCode::TransactionFailure,
    };

    match e {
        LendingError::NotFound { .. } => (StatusCode::NOT_FOUND, code, e.to_string()),
        LendingError::InventoryExhausted { .. } | LendingError::AlreadyReturned { .. } => {
            (StatusCode::CONFLICT, code, e.to_string())
        }
        LendingError::CopyCountBelowOnLoan { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, code, e.to_string())
        }
        LendingError::Transaction(store) => {
            tracing::error!(error.cause_chain = ?store, "Lending transaction failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                code,
                "Transaction failed, retry later".to_string(),
            )
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.status_and_code();

        let body = Json(ErrorResponse {
            code: code as u32,
            error: format!("{:?}", code),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
