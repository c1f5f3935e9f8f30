//! Ledger of deleted accounts, used to hand a re-registering login its
//! previous uuid.

use crate::error::StoreError;
use crate::memory::MemoryAccountStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedAccount {
    pub uuid: Uuid,
    pub login: String,
    pub deleted_at: DateTime<Utc>,
}

#[async_trait]
pub trait DeletedAccounts: Send + Sync {
    /// Record a deletion, replacing any earlier record for the login.
    async fn put(&self, entry: DeletedAccount) -> Result<(), StoreError>;

    async fn find_uuid(&self, login: &str) -> Result<Option<Uuid>, StoreError>;

    async fn remove(&self, login: &str) -> Result<(), StoreError>;

    /// Drop records deleted before `cutoff`. Returns how many were dropped.
    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    async fn list(&self) -> Result<Vec<DeletedAccount>, StoreError>;
}

/// The ledger lives in the account tables, so it is sealed into the same
/// snapshot as the accounts it outlives.
#[async_trait]
impl DeletedAccounts for MemoryAccountStore {
    async fn put(&self, entry: DeletedAccount) -> Result<(), StoreError> {
        debug!(login = %entry.login, uuid = %entry.uuid, "Recording deleted account");
        self.commit(|tables| {
            tables.deleted.insert(entry.login.clone(), entry);
            Ok(())
        })
        .await
    }

    async fn find_uuid(&self, login: &str) -> Result<Option<Uuid>, StoreError> {
        Ok(self.tables.read().await.deleted.get(login).map(|e| e.uuid))
    }

    async fn remove(&self, login: &str) -> Result<(), StoreError> {
        if !self.tables.read().await.deleted.contains_key(login) {
            return Ok(());
        }
        self.commit(|tables| {
            tables.deleted.remove(login);
            Ok(())
        })
        .await
    }

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let expired = self
            .tables
            .read()
            .await
            .deleted
            .values()
            .any(|e| e.deleted_at < cutoff);
        if !expired {
            return Ok(0);
        }
        self.commit(|tables| {
            let before = tables.deleted.len();
            tables.deleted.retain(|_, e| e.deleted_at >= cutoff);
            Ok(before - tables.deleted.len())
        })
        .await
    }

    async fn list(&self) -> Result<Vec<DeletedAccount>, StoreError> {
        let mut all: Vec<_> = self.tables.read().await.deleted.values().cloned().collect();
        all.sort_by(|a, b| a.deleted_at.cmp(&b.deleted_at));
        Ok(all)
    }
}
