//! Account records cached in the cluster cache.

use account_store::Account;
use cluster_cache::{CacheError, ClusterCache};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const LOGIN_PREFIX: &str = "AccountMap::";
const ACCOUNT_PREFIX: &str = "Account::";

fn login_key(login: &str) -> String {
    format!("{}{}", LOGIN_PREFIX, login)
}

fn account_key(uuid: Uuid) -> String {
    format!("{}{}", ACCOUNT_PREFIX, uuid)
}

/// Best-effort account cache.
///
/// Two keys per account: `AccountMap::<login>` holding the uuid and
/// `Account::<uuid>` holding the serialized account, both expiring after
/// `ttl`. Callers absorb every error and go to the store instead.
#[derive(Clone)]
pub struct AccountCache {
    cache: Arc<dyn ClusterCache>,
    ttl: Duration,
}

impl AccountCache {
    pub fn new(cache: Arc<dyn ClusterCache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    pub async fn get_by_uuid(&self, uuid: Uuid) -> Result<Option<Account>, CacheError> {
        match self.cache.get(&account_key(uuid)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn get_by_login(&self, login: &str) -> Result<Option<Account>, CacheError> {
        let uuid = match self.cache.get(&login_key(login)).await? {
            Some(raw) => match raw.parse::<Uuid>() {
                Ok(uuid) => uuid,
                Err(_) => {
                    debug!(%login, "Ignoring malformed cached login mapping");
                    return Ok(None);
                }
            },
            None => return Ok(None),
        };
        // The mapping can outlive a re-registration; only trust a match.
        Ok(self
            .get_by_uuid(uuid)
            .await?
            .filter(|account| account.login == login))
    }

    pub async fn put(&self, account: &Account) -> Result<(), CacheError> {
        let raw = serde_json::to_string(account)?;
        self.cache
            .set(
                &login_key(&account.login),
                &account.uuid.to_string(),
                Some(self.ttl),
            )
            .await?;
        self.cache
            .set(&account_key(account.uuid), &raw, Some(self.ttl))
            .await
    }

    /// Cache `account` unless an equal or newer version is already cached.
    /// Returns whether it was written.
    pub async fn put_if_newer(&self, account: &Account) -> Result<bool, CacheError> {
        let cached = match self.get_by_uuid(account.uuid).await {
            Ok(cached) => cached,
            Err(CacheError::Serialization(_)) => None,
            Err(e) => return Err(e),
        };
        if let Some(cached) = cached {
            if cached.version >= account.version {
                debug!(
                    uuid = %account.uuid,
                    cached = cached.version,
                    candidate = account.version,
                    "Keeping newer cached account"
                );
                return Ok(false);
            }
        }
        self.put(account).await?;
        Ok(true)
    }

    pub async fn invalidate(&self, account: &Account) -> Result<(), CacheError> {
        self.cache.del(&login_key(&account.login)).await?;
        self.cache.del(&account_key(account.uuid)).await?;
        Ok(())
    }
}
