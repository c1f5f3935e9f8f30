//! Account store errors.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The uuid is already bound to a different login. Never retried.
    #[error("Account {uuid} is bound to a different login than {login}")]
    ValidationConflict { uuid: Uuid, login: String },

    /// The stored version moved since the account was read.
    #[error("Contested optimistic lock on account {0}")]
    ContestedOptimisticLock(Uuid),

    #[error("Account not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid login: {0}")]
    InvalidLogin(String),

    /// A transactional condition other than the account version failed.
    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether re-reading the account and retrying can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::ContestedOptimisticLock(_))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Storage(e.to_string())
    }
}

impl From<aes_gcm::Error> for StoreError {
    fn from(_: aes_gcm::Error) -> Self {
        StoreError::Encryption("AES-GCM encryption/decryption failed".to_string())
    }
}
