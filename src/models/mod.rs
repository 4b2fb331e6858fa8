//! Data models for the lending server

pub mod book;
pub mod loan;
pub mod member;
pub mod session;

// Re-export commonly used types
pub use book::{Book, BookDetails, CopyCounts};
pub use loan::{Loan, LoanStatus};
pub use member::Member;
pub use session::{Role, SessionClaims};
