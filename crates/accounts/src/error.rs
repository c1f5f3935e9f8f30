//! Account lifecycle errors.

use crate::dependents::DependentStoreError;
use account_store::StoreError;
use directory::DirectoryError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ManagerError {
    /// Store failures, including validation conflicts and contested locks,
    /// surface unchanged.
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Gave up updating account {uuid} after {attempts} contested attempts")]
    RetryLimitExceeded { uuid: Uuid, attempts: u32 },

    #[error("Invalid login: {0}")]
    InvalidLogin(String),

    #[error("Account not found: {0}")]
    NotFound(Uuid),

    #[error("Lease unavailable: {0}")]
    LeaseUnavailable(String),

    #[error(transparent)]
    Dependent(#[from] DependentStoreError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}
