//! Library lending server
//!
//! REST JSON API over members, books and loans. Borrow and return run
//! through the lending engine in [`services::lending`], which keeps copy
//! counters consistent under concurrent requests using row locks in the
//! store (see [`ledger`]).

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod error;
pub mod ledger;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult, LendingError};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: Arc<services::Services>,
}
