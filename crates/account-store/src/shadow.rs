//! Write mirroring between two account stores during a migration.

use crate::account::Account;
use crate::error::StoreError;
use crate::store::AccountStore;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Counters for mirrored writes.
#[derive(Debug, Default)]
pub struct ShadowStats {
    mirrored: AtomicU64,
    failed: AtomicU64,
}

impl ShadowStats {
    pub fn mirrored(&self) -> u64 {
        self.mirrored.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Serves everything from `primary` and copies each successful write into
/// `secondary`.
///
/// The secondary never fails a caller: its errors are logged and counted.
pub struct ShadowWriteStore {
    primary: Arc<dyn AccountStore>,
    secondary: Arc<dyn AccountStore>,
    stats: Arc<ShadowStats>,
}

impl ShadowWriteStore {
    pub fn new(primary: Arc<dyn AccountStore>, secondary: Arc<dyn AccountStore>) -> Self {
        Self {
            primary,
            secondary,
            stats: Arc::new(ShadowStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<ShadowStats> {
        self.stats.clone()
    }

    /// Copy the primary's current row for `uuid` into the secondary, or
    /// remove it there if the primary no longer has it.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, uuid: Uuid) -> Result<(), StoreError> {
        match self.primary.get_by_uuid(uuid).await? {
            Some(account) => self.upsert_secondary(&account).await,
            None => {
                let version = self.secondary.directory_version().await?;
                self.secondary.delete(uuid, version).await
            }
        }
    }

    /// Overwrite the secondary row with `account`, whatever version it holds.
    async fn upsert_secondary(&self, account: &Account) -> Result<(), StoreError> {
        let mut copy = account.clone();
        match self.secondary.get_by_uuid(account.uuid).await? {
            Some(existing) => {
                copy.version = existing.version;
                self.secondary.update(&mut copy).await
            }
            None => {
                let version = self.secondary.directory_version().await?;
                self.secondary.create(&mut copy, version).await.map(|_| ())
            }
        }
    }

    fn record(&self, op: &str, uuid: Uuid, result: Result<(), StoreError>) {
        match result {
            Ok(()) => {
                self.stats.mirrored.fetch_add(1, Ordering::Relaxed);
                debug!(%uuid, "Mirrored {} to secondary store", op);
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(%uuid, "Failed to mirror {} to secondary store: {}", op, e);
            }
        }
    }
}

#[async_trait]
impl AccountStore for ShadowWriteStore {
    async fn create(&self, account: &mut Account, directory_version: u64) -> Result<bool, StoreError> {
        let fresh = self.primary.create(account, directory_version).await?;
        let mut copy = account.clone();
        let mirrored = if fresh {
            self.secondary
                .create(&mut copy, directory_version)
                .await
                .map(|_| ())
        } else {
            self.upsert_secondary(&copy).await
        };
        self.record("create", account.uuid, mirrored);
        Ok(fresh)
    }

    async fn update(&self, account: &mut Account) -> Result<(), StoreError> {
        self.primary.update(account).await?;
        let mirrored = self.upsert_secondary(account).await;
        self.record("update", account.uuid, mirrored);
        Ok(())
    }

    async fn get_by_login(&self, login: &str) -> Result<Option<Account>, StoreError> {
        self.primary.get_by_login(login).await
    }

    async fn get_by_uuid(&self, uuid: Uuid) -> Result<Option<Account>, StoreError> {
        self.primary.get_by_uuid(uuid).await
    }

    async fn delete(&self, uuid: Uuid, directory_version: u64) -> Result<(), StoreError> {
        self.primary.delete(uuid, directory_version).await?;
        let mirrored = self.secondary.delete(uuid, directory_version).await;
        self.record("delete", uuid, mirrored);
        Ok(())
    }

    async fn get_all_from(&self, after: Option<Uuid>, limit: usize) -> Result<Vec<Account>, StoreError> {
        self.primary.get_all_from(after, limit).await
    }

    async fn directory_version(&self) -> Result<u64, StoreError> {
        self.primary.directory_version().await
    }

    async fn advance_directory_version(&self, directory_version: u64) -> Result<(), StoreError> {
        self.primary.advance_directory_version(directory_version).await?;
        match self.secondary.advance_directory_version(directory_version).await {
            Ok(()) => {
                self.stats.mirrored.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to mirror directory version {}: {}", directory_version, e);
            }
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.primary.count().await
    }
}
