//! The account repository contract.

use crate::account::Account;
use crate::error::StoreError;
use async_trait::async_trait;
use uuid::Uuid;

/// Durable account storage.
///
/// Backed by three pieces of state written together: an accounts table keyed
/// by uuid, a logins table mapping each login to its uuid, and a scalar
/// directory-version register. Reads are strongly consistent.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert a new account and move the directory-version register to
    /// `directory_version`, all or nothing.
    ///
    /// If the login is already reserved by a different uuid, the account
    /// adopts that uuid (and, when the row exists, its version) and the write
    /// becomes an update. Returns `true` only when a fresh account was
    /// created. Fails with [`StoreError::ValidationConflict`] when the uuid
    /// already belongs to another login.
    async fn create(&self, account: &mut Account, directory_version: u64) -> Result<bool, StoreError>;

    /// Write `account` if the stored version still equals `account.version`,
    /// then bump the version on both sides.
    async fn update(&self, account: &mut Account) -> Result<(), StoreError>;

    async fn get_by_login(&self, login: &str) -> Result<Option<Account>, StoreError>;

    async fn get_by_uuid(&self, uuid: Uuid) -> Result<Option<Account>, StoreError>;

    /// Remove the account row and its login reservation and move the
    /// directory-version register to `directory_version`, all or nothing.
    async fn delete(&self, uuid: Uuid, directory_version: u64) -> Result<(), StoreError>;

    /// Up to `limit` accounts with uuid strictly greater than `after`, in
    /// ascending uuid order.
    async fn get_all_from(&self, after: Option<Uuid>, limit: usize) -> Result<Vec<Account>, StoreError>;

    async fn directory_version(&self) -> Result<u64, StoreError>;

    /// Move the directory-version register to `directory_version` without
    /// touching any rows. Fails with [`StoreError::TransactionConflict`] when
    /// the register is already past it.
    async fn advance_directory_version(&self, directory_version: u64) -> Result<(), StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}
