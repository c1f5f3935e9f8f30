//! In-process account tables with transactional writes.

use crate::account::Account;
use crate::error::StoreError;
use crate::ledger::DeletedAccount;
use crate::snapshot::EncryptedSnapshot;
use crate::store::AccountStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// The state behind an account store: the accounts and logins tables, the
/// directory-version register and the recently-deleted ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountTables {
    pub accounts: BTreeMap<Uuid, Account>,
    pub logins: HashMap<String, Uuid>,
    pub directory_version: u64,
    #[serde(default)]
    pub deleted: HashMap<String, DeletedAccount>,
}

enum CreateOutcome {
    Inserted,
    LoginTaken(Uuid),
}

impl AccountTables {
    fn check_directory_version(&self, directory_version: u64) -> Result<(), StoreError> {
        if directory_version < self.directory_version {
            return Err(StoreError::TransactionConflict(format!(
                "directory version {} is behind stored {}",
                directory_version, self.directory_version
            )));
        }
        Ok(())
    }

    /// Conditional insert. Checks every condition before touching anything.
    fn try_create(&mut self, account: &Account, directory_version: u64) -> Result<CreateOutcome, StoreError> {
        if let Some(existing) = self.logins.get(&account.login) {
            if *existing != account.uuid {
                return Ok(CreateOutcome::LoginTaken(*existing));
            }
        }
        if let Some(row) = self.accounts.get(&account.uuid) {
            if row.login != account.login {
                return Err(StoreError::ValidationConflict {
                    uuid: account.uuid,
                    login: account.login.clone(),
                });
            }
        }
        self.check_directory_version(directory_version)?;

        self.logins.insert(account.login.clone(), account.uuid);
        self.accounts.insert(account.uuid, account.clone());
        self.directory_version = directory_version;
        Ok(CreateOutcome::Inserted)
    }

    /// Version-conditioned write. On success the stored row carries
    /// `account.version + 1`.
    fn try_update(&mut self, account: &Account) -> Result<(), StoreError> {
        let stored = self
            .accounts
            .get(&account.uuid)
            .ok_or(StoreError::NotFound(account.uuid))?;
        if stored.login != account.login {
            return Err(StoreError::ValidationConflict {
                uuid: account.uuid,
                login: account.login.clone(),
            });
        }
        if stored.version != account.version {
            return Err(StoreError::ContestedOptimisticLock(account.uuid));
        }

        let mut row = account.clone();
        row.version += 1;
        self.accounts.insert(account.uuid, row);
        Ok(())
    }

    /// Create, adopting the uuid already reserved for the login if there is
    /// one. Returns whether the account is fresh.
    fn create_or_adopt(&mut self, account: &mut Account, directory_version: u64) -> Result<bool, StoreError> {
        let existing = match self.try_create(account, directory_version)? {
            CreateOutcome::Inserted => return Ok(true),
            CreateOutcome::LoginTaken(existing) => existing,
        };

        debug!(
            login = %account.login,
            discarded = %account.uuid,
            adopted = %existing,
            "Login already reserved, adopting existing uuid"
        );
        account.uuid = existing;

        match self.accounts.get(&existing).map(|row| row.version) {
            Some(version) => {
                account.version = version;
                self.check_directory_version(directory_version)?;
                self.try_update(account)?;
                account.version += 1;
                self.directory_version = directory_version;
            }
            None => {
                // Dangling reservation: the mapping now matches, so this inserts.
                self.try_create(account, directory_version)?;
            }
        }
        Ok(false)
    }

    fn advance_directory_version(&mut self, directory_version: u64) -> Result<(), StoreError> {
        self.check_directory_version(directory_version)?;
        self.directory_version = directory_version;
        Ok(())
    }

    fn delete(&mut self, uuid: Uuid, directory_version: u64) -> Result<(), StoreError> {
        self.check_directory_version(directory_version)?;
        if let Some(row) = self.accounts.remove(&uuid) {
            if self.logins.get(&row.login) == Some(&uuid) {
                self.logins.remove(&row.login);
            }
        }
        self.directory_version = directory_version;
        Ok(())
    }
}

/// Account store over in-process tables.
///
/// Every write takes the table lock, checks all of its conditions, and only
/// then mutates. When an [`EncryptedSnapshot`] is attached the mutation is
/// staged on a copy, sealed to disk, and swapped in only once the snapshot
/// is written.
pub struct MemoryAccountStore {
    pub(crate) tables: RwLock<AccountTables>,
    snapshot: Option<EncryptedSnapshot>,
}

impl MemoryAccountStore {
    /// Create an empty, non-persistent store.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(AccountTables::default()),
            snapshot: None,
        }
    }

    /// Open a store persisted to `snapshot`, loading existing tables.
    pub async fn open(snapshot: EncryptedSnapshot) -> Result<Self, StoreError> {
        let tables = snapshot.load().await?;
        info!(
            "Opened account store with {} accounts at directory version {}",
            tables.accounts.len(),
            tables.directory_version
        );
        Ok(Self {
            tables: RwLock::new(tables),
            snapshot: Some(snapshot),
        })
    }

    pub(crate) async fn commit<T>(
        &self,
        apply: impl FnOnce(&mut AccountTables) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut tables = self.tables.write().await;
        match &self.snapshot {
            None => apply(&mut tables),
            Some(snapshot) => {
                let mut staged = tables.clone();
                let out = apply(&mut staged)?;
                snapshot.save(&staged).await?;
                *tables = staged;
                Ok(out)
            }
        }
    }
}

impl Default for MemoryAccountStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    #[instrument(skip(self, account), fields(login = %account.login, uuid = %account.uuid))]
    async fn create(&self, account: &mut Account, directory_version: u64) -> Result<bool, StoreError> {
        let mut candidate = account.clone();
        let fresh = self
            .commit(|tables| tables.create_or_adopt(&mut candidate, directory_version))
            .await?;
        *account = candidate;
        Ok(fresh)
    }

    #[instrument(skip(self, account), fields(uuid = %account.uuid, version = account.version))]
    async fn update(&self, account: &mut Account) -> Result<(), StoreError> {
        self.commit(|tables| tables.try_update(account)).await?;
        account.version += 1;
        Ok(())
    }

    async fn get_by_login(&self, login: &str) -> Result<Option<Account>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .logins
            .get(login)
            .and_then(|uuid| tables.accounts.get(uuid))
            .cloned())
    }

    async fn get_by_uuid(&self, uuid: Uuid) -> Result<Option<Account>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.accounts.get(&uuid).cloned())
    }

    #[instrument(skip(self))]
    async fn delete(&self, uuid: Uuid, directory_version: u64) -> Result<(), StoreError> {
        self.commit(|tables| tables.delete(uuid, directory_version))
            .await
    }

    async fn get_all_from(&self, after: Option<Uuid>, limit: usize) -> Result<Vec<Account>, StoreError> {
        let tables = self.tables.read().await;
        let lower = match after {
            Some(uuid) => Bound::Excluded(uuid),
            None => Bound::Unbounded,
        };
        Ok(tables
            .accounts
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, account)| account.clone())
            .collect())
    }

    async fn directory_version(&self) -> Result<u64, StoreError> {
        Ok(self.tables.read().await.directory_version)
    }

    #[instrument(skip(self))]
    async fn advance_directory_version(&self, directory_version: u64) -> Result<(), StoreError> {
        self.commit(|tables| tables.advance_directory_version(directory_version))
            .await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.tables.read().await.accounts.len())
    }
}
