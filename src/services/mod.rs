//! Business logic services

pub mod catalog;
pub mod lending;
pub mod loans;
pub mod members;

use crate::{config::LendingConfig, ledger::PgLedger, repository::Repository};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub repository: Repository,
    pub catalog: catalog::CatalogService,
    pub members: members::MembersService,
    pub loans: loans::LoansService,
    pub lending: lending::LendingService,
}

impl Services {
    /// Create all services with the given repository. The lending engine
    /// shares the repository's pool through a [`PgLedger`].
    pub fn new(repository: Repository, lending_config: &LendingConfig) -> Self {
        let ledger = PgLedger::new(repository.pool.clone(), lending_config.lock_timeout());
        let lending = lending::LendingService::new(ledger, lending_config.request_deadline());

        Self {
            catalog: catalog::CatalogService::new(repository.clone(), lending.clone()),
            members: members::MembersService::new(repository.clone()),
            loans: loans::LoansService::new(repository.clone(), lending.clone()),
            lending,
            repository,
        }
    }
}
