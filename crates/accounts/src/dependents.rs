//! Per-account state held by other services.
//!
//! Keys, queued messages, profiles and usernames are owned elsewhere; the
//! manager only needs to wipe them for a uuid before the account row goes
//! away or before a re-registration adopts an old uuid.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DependentStoreError {
    #[error("{store} purge failed for {uuid}: {reason}")]
    Failed {
        store: &'static str,
        uuid: Uuid,
        reason: String,
    },
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn delete_all(&self, uuid: Uuid) -> Result<(), DependentStoreError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn clear(&self, uuid: Uuid) -> Result<(), DependentStoreError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn delete_all(&self, uuid: Uuid) -> Result<(), DependentStoreError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UsernameStore: Send + Sync {
    async fn clear(&self, uuid: Uuid) -> Result<(), DependentStoreError>;
}

/// The dependent stores the manager purges.
#[derive(Clone)]
pub struct DependentStores {
    pub keys: Arc<dyn KeyStore>,
    pub messages: Arc<dyn MessageStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub usernames: Arc<dyn UsernameStore>,
}

impl DependentStores {
    /// Stores that hold nothing, for deployments where those services run
    /// elsewhere.
    pub fn detached() -> Self {
        let detached = Arc::new(DetachedStores);
        Self {
            keys: detached.clone(),
            messages: detached.clone(),
            profiles: detached.clone(),
            usernames: detached,
        }
    }

    /// Wipe state derived from a uuid: keys, messages and profiles.
    pub async fn purge_derived(&self, uuid: Uuid) -> Result<(), DependentStoreError> {
        futures::try_join!(
            self.keys.delete_all(uuid),
            self.messages.clear(uuid),
            self.profiles.delete_all(uuid),
        )?;
        debug!(%uuid, "Purged derived account state");
        Ok(())
    }

    /// Wipe everything held for a uuid, usernames included.
    pub async fn purge_all(&self, uuid: Uuid) -> Result<(), DependentStoreError> {
        futures::try_join!(
            self.keys.delete_all(uuid),
            self.messages.clear(uuid),
            self.profiles.delete_all(uuid),
            self.usernames.clear(uuid),
        )?;
        debug!(%uuid, "Purged all dependent account state");
        Ok(())
    }
}

struct DetachedStores;

#[async_trait]
impl KeyStore for DetachedStores {
    async fn delete_all(&self, _uuid: Uuid) -> Result<(), DependentStoreError> {
        Ok(())
    }
}

#[async_trait]
impl MessageStore for DetachedStores {
    async fn clear(&self, _uuid: Uuid) -> Result<(), DependentStoreError> {
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for DetachedStores {
    async fn delete_all(&self, _uuid: Uuid) -> Result<(), DependentStoreError> {
        Ok(())
    }
}

#[async_trait]
impl UsernameStore for DetachedStores {
    async fn clear(&self, _uuid: Uuid) -> Result<(), DependentStoreError> {
        Ok(())
    }
}
