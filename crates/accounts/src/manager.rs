//! Account lifecycle: create, update, delete and cached reads.

use crate::cache::AccountCache;
use crate::config::ManagerConfig;
use crate::dependents::DependentStores;
use crate::error::ManagerError;
use crate::dependents::DependentStoreError;
use account_store::{
    normalize_login, Account, AccountAttributes, AccountStore, AuthCredential, DeletedAccount,
    DeletedAccounts, Device, DeviceId, StoreError,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cluster_cache::{worker_id, ClusterCache, Lease, LeaseGuard};
use directory::DirectoryPropagator;
use secrecy::SecretString;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Lease serializing directory-version bookkeeping across the cluster.
pub const DIRECTORY_LEASE_KEY: &str = "DirectoryLease";

/// Why an account is being removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionReason {
    AdminDeleted,
    Expired,
    UserRequest,
}

impl fmt::Display for DeletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DeletionReason::AdminDeleted => "admin",
            DeletionReason::Expired => "expired",
            DeletionReason::UserRequest => "userRequest",
        };
        f.write_str(reason)
    }
}

/// Result of [`AccountsManager::create`].
#[derive(Debug, Clone)]
pub struct Registration {
    pub account: Account,
    /// False when the login re-registered onto an existing account.
    pub fresh_user: bool,
}

/// Coordinates the account store, the account cache, the directory and the
/// dependent stores.
pub struct AccountsManager {
    store: Arc<dyn AccountStore>,
    cache: AccountCache,
    directory: Arc<DirectoryPropagator>,
    deleted_accounts: Arc<dyn DeletedAccounts>,
    dependents: DependentStores,
    lease: Lease,
    worker_id: String,
    config: ManagerConfig,
}

impl AccountsManager {
    pub fn new(
        store: Arc<dyn AccountStore>,
        cluster: Arc<dyn ClusterCache>,
        directory: Arc<DirectoryPropagator>,
        deleted_accounts: Arc<dyn DeletedAccounts>,
        dependents: DependentStores,
        config: ManagerConfig,
    ) -> Self {
        let lease = Lease::new(
            cluster.clone(),
            DIRECTORY_LEASE_KEY,
            config.directory_lease_ttl,
        );
        Self {
            store,
            cache: AccountCache::new(cluster, config.account_cache_ttl),
            directory,
            deleted_accounts,
            dependents,
            lease,
            worker_id: worker_id(),
            config,
        }
    }

    pub fn directory(&self) -> &Arc<DirectoryPropagator> {
        &self.directory
    }

    /// Register `login`, or re-register it onto the account it already has.
    #[instrument(skip(self, password, user_agent, attributes))]
    pub async fn create(
        &self,
        login: &str,
        password: &SecretString,
        user_agent: Option<String>,
        attributes: &AccountAttributes,
    ) -> Result<Registration, ManagerError> {
        let login = normalize(login)?;

        let mut primary = Device::new(
            DeviceId::PRIMARY,
            AuthCredential::generate(password),
            attributes.registration_id,
            user_agent,
            Utc::now(),
        );
        primary.push.fetches_messages = attributes.fetches_messages;
        primary.capabilities = attributes.capabilities;

        let recovered = match self.deleted_accounts.find_uuid(&login).await {
            Ok(uuid) => uuid,
            Err(e) => {
                warn!("Deleted-account lookup failed for {}: {}", login, e);
                None
            }
        };
        let original_uuid = recovered.unwrap_or_else(Uuid::new_v4);
        let mut account = Account::new(original_uuid, login.clone(), primary, attributes);

        let guard = self.acquire_directory_lease().await?;
        let result = self.create_locked(&mut account, original_uuid).await;
        release(guard).await;
        let (fresh_user, purged) = result?;

        if let Err(e) = self.cache.put(&account).await {
            warn!("Failed to cache account {}: {}", account.uuid, e);
        }
        if recovered.is_some() {
            if let Err(e) = self.deleted_accounts.remove(&login).await {
                warn!("Failed to clear deleted-account entry for {}: {}", login, e);
            }
        }

        if let Err(e) = purged {
            warn!(uuid = %account.uuid, "Registered account, dependent state not purged: {}", e);
            return Err(e.into());
        }
        info!(uuid = %account.uuid, fresh_user, "Registered account");
        Ok(Registration {
            account,
            fresh_user,
        })
    }

    /// Store the account and publish its directory version. A failed purge
    /// of adopted dependent state is handed back after the publish.
    async fn create_locked(
        &self,
        account: &mut Account,
        original_uuid: Uuid,
    ) -> Result<(bool, Result<(), DependentStoreError>), ManagerError> {
        let version = self.store.directory_version().await? + 1;
        let fresh_user = self.store.create(account, version).await?;

        let mut purged = Ok(());
        if account.uuid != original_uuid {
            debug!(
                adopted = %account.uuid,
                discarded = %original_uuid,
                "Re-registration adopted an existing uuid"
            );
            purged = self.dependents.purge_derived(account.uuid).await;
        }

        if let Err(e) = self.directory.record_create(account).await {
            warn!("Failed to stage directory add for {}: {}", account.uuid, e);
        }
        self.publish_directory(version).await;
        Ok((fresh_user, purged))
    }

    /// Apply `mutate` and persist it, re-reading and reapplying on version
    /// conflicts. `mutate` returns whether it changed anything.
    #[instrument(skip(self, account, mutate), fields(uuid = %account.uuid))]
    pub async fn update<F>(&self, account: &Account, mut mutate: F) -> Result<Account, ManagerError>
    where
        F: FnMut(&mut Account) -> bool + Send,
    {
        let mut account = account.clone();
        if !mutate(&mut account) {
            return Ok(account);
        }

        if let Err(e) = self.cache.invalidate(&account).await {
            warn!("Failed to invalidate cached account {}: {}", account.uuid, e);
        }

        let max_attempts = self.config.max_update_attempts.max(1);
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.store.update(&mut account).await {
                Ok(()) => break,
                Err(StoreError::ContestedOptimisticLock(uuid)) => {
                    if attempts >= max_attempts {
                        warn!("Update of {} still contested after {} attempts", uuid, attempts);
                        return Err(ManagerError::RetryLimitExceeded { uuid, attempts });
                    }
                    debug!(attempt = attempts, "Contested update, re-reading account");
                    account = self
                        .store
                        .get_by_uuid(uuid)
                        .await?
                        .ok_or(ManagerError::NotFound(uuid))?;
                    if !mutate(&mut account) {
                        break;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        if let Err(e) = self.cache.put_if_newer(&account).await {
            warn!("Failed to cache account {}: {}", account.uuid, e);
        }
        Ok(account)
    }

    /// [`update`](Self::update) targeting a single device. A missing device
    /// is left alone.
    pub async fn update_device<F>(
        &self,
        account: &Account,
        device_id: DeviceId,
        mut mutate: F,
    ) -> Result<Account, ManagerError>
    where
        F: FnMut(&mut Device) -> bool + Send,
    {
        self.update(account, move |account| match account.device_mut(device_id) {
            Some(device) => mutate(device),
            None => false,
        })
        .await
    }

    pub async fn update_device_last_seen(
        &self,
        account: &Account,
        device_id: DeviceId,
        when: DateTime<Utc>,
    ) -> Result<Account, ManagerError> {
        self.update_device(account, device_id, move |device| {
            if when > device.last_seen {
                device.last_seen = when;
                true
            } else {
                false
            }
        })
        .await
    }

    /// Delete a batch of accounts and publish one directory version for it.
    ///
    /// Dependent state for each account is purged before its row goes. On a
    /// failure part way through, the accounts already removed are still
    /// published and the error is returned.
    #[instrument(skip(self, accounts), fields(count = accounts.len(), %reason))]
    pub async fn delete(&self, accounts: &[Account], reason: DeletionReason) -> Result<(), ManagerError> {
        if accounts.is_empty() {
            return Ok(());
        }

        let guard = self.acquire_directory_lease().await?;
        let result = self.delete_locked(accounts, reason).await;
        release(guard).await;
        result
    }

    async fn delete_locked(&self, accounts: &[Account], reason: DeletionReason) -> Result<(), ManagerError> {
        let version = self.store.directory_version().await? + 1;

        let mut removed = Vec::with_capacity(accounts.len());
        let mut failure = None;
        for account in accounts {
            match self.delete_one(account, version, reason).await {
                Ok(()) => removed.push(account.clone()),
                Err(e) => {
                    warn!("Failed to delete account {}: {}", account.uuid, e);
                    failure = Some(e);
                    break;
                }
            }
        }

        if !removed.is_empty() {
            if let Err(e) = self.directory.record_removal(&removed).await {
                warn!("Failed to stage directory removals: {}", e);
            }
            self.publish_directory(version).await;
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn delete_one(
        &self,
        account: &Account,
        version: u64,
        reason: DeletionReason,
    ) -> Result<(), ManagerError> {
        self.dependents.purge_all(account.uuid).await?;
        self.store.delete(account.uuid, version).await?;

        let entry = DeletedAccount {
            uuid: account.uuid,
            login: account.login.clone(),
            deleted_at: Utc::now(),
        };
        if let Err(e) = self.deleted_accounts.put(entry).await {
            warn!("Failed to record deleted account {}: {}", account.uuid, e);
        }
        if let Err(e) = self.cache.invalidate(account).await {
            warn!("Failed to invalidate cached account {}: {}", account.uuid, e);
        }

        info!(uuid = %account.uuid, %reason, "Deleted account");
        Ok(())
    }

    /// Look up an account by login, accepting any formatting
    /// [`normalize_login`] understands.
    pub async fn get_by_login(&self, login: &str) -> Result<Option<Account>, ManagerError> {
        let login = normalize(login)?;
        match self.cache.get_by_login(&login).await {
            Ok(Some(account)) => return Ok(Some(account)),
            Ok(None) => {}
            Err(e) => warn!("Account cache unavailable, reading store: {}", e),
        }
        let account = self.store.get_by_login(&login).await?;
        self.repopulate(account.as_ref()).await;
        Ok(account)
    }

    pub async fn get_by_uuid(&self, uuid: Uuid) -> Result<Option<Account>, ManagerError> {
        match self.cache.get_by_uuid(uuid).await {
            Ok(Some(account)) => return Ok(Some(account)),
            Ok(None) => {}
            Err(e) => warn!("Account cache unavailable, reading store: {}", e),
        }
        let account = self.store.get_by_uuid(uuid).await?;
        self.repopulate(account.as_ref()).await;
        Ok(account)
    }

    /// Accounts after `after` in uuid order, read straight from the store.
    pub async fn get_all_from(&self, after: Option<Uuid>, limit: usize) -> Result<Vec<Account>, ManagerError> {
        Ok(self.store.get_all_from(after, limit).await?)
    }

    /// Refill the cache after a miss. A writer may have cached a newer
    /// version since the store was read, so older reads never replace it.
    async fn repopulate(&self, account: Option<&Account>) {
        if let Some(account) = account {
            if let Err(e) = self.cache.put_if_newer(account).await {
                debug!("Failed to repopulate cached account {}: {}", account.uuid, e);
            }
        }
    }

    /// Bring the directory in line with accounts read from the store: list
    /// visible accounts that are missing and withdraw hidden ones. Returns
    /// how many changes were staged; publish them with
    /// [`publish_directory_changes`](Self::publish_directory_changes).
    #[instrument(skip(self, accounts), fields(count = accounts.len()))]
    pub async fn reconcile_directory(&self, accounts: &[Account]) -> Result<usize, ManagerError> {
        if accounts.is_empty() {
            return Ok(0);
        }
        let guard = self.acquire_directory_lease().await?;
        let result = self.reconcile_locked(accounts).await;
        release(guard).await;
        result
    }

    async fn reconcile_locked(&self, accounts: &[Account]) -> Result<usize, ManagerError> {
        let mut staged = 0;
        for account in accounts {
            let changed = if account.is_visible_in_directory() {
                self.directory.record_create(account).await?
            } else {
                self.directory.remove_login(&account.login).await?
            };
            if changed {
                debug!(uuid = %account.uuid, "Reconciled directory listing");
                staged += 1;
            }
        }
        Ok(staged)
    }

    /// Withdraw listings the store no longer backs: logins without an
    /// account, hidden accounts and listings naming another uuid. Returns
    /// how many were withdrawn.
    #[instrument(skip(self))]
    pub async fn sweep_directory(&self) -> Result<usize, ManagerError> {
        let guard = self.acquire_directory_lease().await?;
        let result = self.sweep_locked().await;
        release(guard).await;
        result
    }

    async fn sweep_locked(&self) -> Result<usize, ManagerError> {
        let (_, listed) = self.directory.full_directory().await?;
        let mut withdrawn = 0;
        for (login, entry) in listed {
            let backed = match self.store.get_by_login(&login).await? {
                Some(account) => account.uuid == entry.uuid && account.is_visible_in_directory(),
                None => false,
            };
            if !backed && self.directory.remove_login(&login).await? {
                debug!(%login, "Withdrew dangling directory listing");
                withdrawn += 1;
            }
        }
        Ok(withdrawn)
    }

    /// Publish staged directory changes as the next directory version,
    /// advancing the store's register to match. Returns the new version.
    #[instrument(skip(self))]
    pub async fn publish_directory_changes(&self) -> Result<u64, ManagerError> {
        let guard = self.acquire_directory_lease().await?;
        let result = self.publish_changes_locked().await;
        release(guard).await;
        result
    }

    async fn publish_changes_locked(&self) -> Result<u64, ManagerError> {
        let version = self.store.directory_version().await? + 1;
        self.store.advance_directory_version(version).await?;
        self.directory.build_incremental_updates(version).await?;
        Ok(version)
    }

    /// Forget deleted logins older than the retention window. Returns how
    /// many were dropped.
    pub async fn prune_deleted_accounts(&self) -> Result<usize, ManagerError> {
        let cutoff = match ChronoDuration::from_std(self.config.deleted_account_retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
        {
            Some(cutoff) => cutoff,
            None => return Ok(0),
        };
        let pruned = self.deleted_accounts.prune_older_than(cutoff).await?;
        if pruned > 0 {
            info!(pruned, "Pruned deleted-account ledger");
        }
        Ok(pruned)
    }

    async fn publish_directory(&self, version: u64) {
        if let Err(e) = self.directory.build_incremental_updates(version).await {
            warn!(
                "Failed to publish directory version {}, consumers will resync: {}",
                version, e
            );
        }
    }

    /// Take the directory lease. An unreachable cache proceeds without it;
    /// a lease held by someone else past `lease_wait` is an error.
    async fn acquire_directory_lease(&self) -> Result<Option<LeaseGuard>, ManagerError> {
        match self
            .lease
            .acquire(
                &self.worker_id,
                self.config.lease_wait,
                self.config.lease_retry_interval,
            )
            .await
        {
            Ok(Some(guard)) => Ok(Some(guard)),
            Ok(None) => {
                let holder = self.lease.holder().await.ok().flatten();
                Err(ManagerError::LeaseUnavailable(format!(
                    "{} still held by {} after {:?}",
                    self.lease.key(),
                    holder.as_deref().unwrap_or("unknown"),
                    self.config.lease_wait
                )))
            }
            Err(e) => {
                warn!("Cache unavailable, proceeding without directory lease: {}", e);
                Ok(None)
            }
        }
    }
}

async fn release(guard: Option<LeaseGuard>) {
    if let Some(guard) = guard {
        if let Err(e) = guard.release().await {
            warn!("Failed to release directory lease: {}", e);
        }
    }
}

fn normalize(login: &str) -> Result<String, ManagerError> {
    normalize_login(login).map_err(|e| match e {
        StoreError::InvalidLogin(reason) => ManagerError::InvalidLogin(reason),
        other => other.into(),
    })
}
