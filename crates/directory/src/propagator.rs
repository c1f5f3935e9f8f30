//! Directory maintenance and diff generation.

use crate::error::DirectoryError;
use account_store::Account;
use cluster_cache::ClusterCache;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Hash of every discoverable login.
pub const DIRECTORY_PLAIN_KEY: &str = "DirectoryPlain";

/// Version the directory was last published at.
pub const DIRECTORY_VERSION_KEY: &str = "DirectoryVersion";

/// Net changes staged since the last diff build.
pub const CURRENT_UPDATE_KEY: &str = "CurrentUpdate";

/// Prefix of the diff ring slots, `IncrementalUpdate::<backoff>`.
pub const INCREMENTAL_UPDATE_PREFIX: &str = "IncrementalUpdate::";

/// Reserved field in each diff slot holding the version it was built at.
pub const VERSION_FIELD: &str = "#version";

pub const DEFAULT_HISTORY_DEPTH: u64 = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    /// Number of diff generations kept
    #[serde(default = "default_history_depth")]
    pub history_depth: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            history_depth: default_history_depth(),
        }
    }
}

fn default_history_depth() -> u64 {
    DEFAULT_HISTORY_DEPTH
}

/// What the directory publishes for one login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub uuid: Uuid,
    pub unrestricted_unidentified_access: bool,
}

impl DirectoryEntry {
    pub fn for_account(account: &Account) -> Self {
        Self {
            uuid: account.uuid,
            unrestricted_unidentified_access: account.unrestricted_unidentified_access,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DirectoryChange {
    Added { entry: DirectoryEntry },
    Removed,
}

/// Net changes between two directory versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryDiff {
    pub from_version: u64,
    pub to_version: u64,
    pub changes: BTreeMap<String, DirectoryChange>,
}

impl DirectoryDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Combine two consecutive change sets.
///
/// A login changed on exactly one side keeps that change; a login changed
/// on both sides cancelled itself out and is dropped.
pub fn merge_changes(
    older: &HashMap<String, String>,
    newer: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut merged = HashMap::new();
    for (login, change) in older.iter().filter(|(k, _)| *k != VERSION_FIELD) {
        if !newer.contains_key(login) {
            merged.insert(login.clone(), change.clone());
        }
    }
    for (login, change) in newer.iter().filter(|(k, _)| *k != VERSION_FIELD) {
        if !older.contains_key(login) {
            merged.insert(login.clone(), change.clone());
        }
    }
    merged
}

fn slot_key(backoff: u64) -> String {
    format!("{}{}", INCREMENTAL_UPDATE_PREFIX, backoff)
}

fn stamp(map: &HashMap<String, String>) -> Option<u64> {
    map.get(VERSION_FIELD).and_then(|v| v.parse().ok())
}

/// Keeps the cached directory and its diff ring in step with account
/// creation and deletion.
///
/// Writers are expected to hold the directory lease around a batch of
/// `record_*` calls and the `build_incremental_updates` that publishes it.
pub struct DirectoryPropagator {
    cache: Arc<dyn ClusterCache>,
    history_depth: u64,
}

impl DirectoryPropagator {
    pub fn new(cache: Arc<dyn ClusterCache>, config: &DirectoryConfig) -> Self {
        Self {
            cache,
            history_depth: config.history_depth.max(1),
        }
    }

    pub fn history_depth(&self) -> u64 {
        self.history_depth
    }

    /// Publish a new account if it is visible and not already listed.
    #[instrument(skip(self, account), fields(login = %account.login))]
    pub async fn record_create(&self, account: &Account) -> Result<bool, DirectoryError> {
        if !account.is_visible_in_directory() {
            debug!("Account not visible, skipping directory add");
            return Ok(false);
        }
        if self
            .cache
            .hget(DIRECTORY_PLAIN_KEY, &account.login)
            .await?
            .is_some()
        {
            return Ok(false);
        }

        let entry = DirectoryEntry::for_account(account);
        self.cache
            .hset(
                DIRECTORY_PLAIN_KEY,
                &account.login,
                &serde_json::to_string(&entry)?,
            )
            .await?;
        self.stage(&account.login, DirectoryChange::Added { entry })
            .await?;
        Ok(true)
    }

    /// Withdraw logins from the directory. Returns how many were listed.
    #[instrument(skip(self, accounts), fields(count = accounts.len()))]
    pub async fn record_removal(&self, accounts: &[Account]) -> Result<usize, DirectoryError> {
        let mut removed = 0;
        for account in accounts {
            if self.remove_login(&account.login).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Withdraw a single login, staging the removal if it was listed.
    pub async fn remove_login(&self, login: &str) -> Result<bool, DirectoryError> {
        if !self.cache.hdel(DIRECTORY_PLAIN_KEY, login).await? {
            return Ok(false);
        }
        self.stage(login, DirectoryChange::Removed).await?;
        Ok(true)
    }

    /// Stage a change. A login staged twice before a build cancels out.
    async fn stage(&self, login: &str, change: DirectoryChange) -> Result<(), DirectoryError> {
        if self.cache.hdel(CURRENT_UPDATE_KEY, login).await? {
            debug!(%login, "Staged change cancelled out");
            return Ok(());
        }
        self.cache
            .hset(CURRENT_UPDATE_KEY, login, &serde_json::to_string(&change)?)
            .await?;
        Ok(())
    }

    /// Turn the staged changes into diff generations for `new_version` and
    /// publish it.
    ///
    /// Slot `b` ends up holding the net diff from `new_version - b` to
    /// `new_version`. A slot whose predecessor is missing or stale is
    /// removed instead, and readers fall back to a full resync.
    #[instrument(skip(self))]
    pub async fn build_incremental_updates(&self, new_version: u64) -> Result<(), DirectoryError> {
        if new_version == 0 {
            return Err(DirectoryError::InvalidVersion(
                "diffs cannot be built for version 0".into(),
            ));
        }

        let current = self.cache.hgetall(CURRENT_UPDATE_KEY).await?;
        let newest = new_version.min(self.history_depth);

        for backoff in (2..=newest).rev() {
            let previous = self.cache.hgetall(&slot_key(backoff - 1)).await?;
            if stamp(&previous) == Some(new_version - 1) {
                let mut merged = merge_changes(&previous, &current);
                merged.insert(VERSION_FIELD.to_string(), new_version.to_string());
                self.cache.hreplace(&slot_key(backoff), merged).await?;
            } else {
                if !previous.is_empty() {
                    warn!(
                        backoff,
                        "Diff history missing for version {}, dropping generation",
                        new_version - 1
                    );
                }
                self.cache.del(&slot_key(backoff)).await?;
            }
        }

        let mut first: HashMap<String, String> = current
            .into_iter()
            .filter(|(k, _)| k != VERSION_FIELD)
            .collect();
        let staged = first.len();
        first.insert(VERSION_FIELD.to_string(), new_version.to_string());
        self.cache.hreplace(&slot_key(1), first).await?;

        self.cache.del(CURRENT_UPDATE_KEY).await?;
        self.cache
            .set(DIRECTORY_VERSION_KEY, &new_version.to_string(), None)
            .await?;

        info!(
            "Published directory version {} with {} staged changes",
            new_version, staged
        );
        Ok(())
    }

    /// The published directory version, 0 before the first build.
    pub async fn version(&self) -> Result<u64, DirectoryError> {
        match self.cache.get(DIRECTORY_VERSION_KEY).await? {
            Some(v) => v.parse().map_err(|_| {
                DirectoryError::InvalidVersion(format!("unparseable directory version {:?}", v))
            }),
            None => Ok(0),
        }
    }

    pub async fn entry(&self, login: &str) -> Result<Option<DirectoryEntry>, DirectoryError> {
        match self.cache.hget(DIRECTORY_PLAIN_KEY, login).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// The whole directory and the version it was published at.
    pub async fn full_directory(
        &self,
    ) -> Result<(u64, BTreeMap<String, DirectoryEntry>), DirectoryError> {
        let version = self.version().await?;
        let mut entries = BTreeMap::new();
        for (login, raw) in self.cache.hgetall(DIRECTORY_PLAIN_KEY).await? {
            entries.insert(login, serde_json::from_str(&raw)?);
        }
        Ok((version, entries))
    }

    /// Diff from `since_version` to the published version.
    ///
    /// `None` means the caller has to resync from the full directory.
    pub async fn incremental_update(
        &self,
        since_version: u64,
    ) -> Result<Option<DirectoryDiff>, DirectoryError> {
        let current = self.version().await?;
        if since_version > current {
            return Ok(None);
        }
        if since_version == current {
            return Ok(Some(DirectoryDiff {
                from_version: since_version,
                to_version: current,
                changes: BTreeMap::new(),
            }));
        }

        let backoff = current - since_version;
        if backoff > self.history_depth {
            return Ok(None);
        }

        let slot = self.cache.hgetall(&slot_key(backoff)).await?;
        if stamp(&slot) != Some(current) {
            return Ok(None);
        }

        let mut changes = BTreeMap::new();
        for (login, raw) in slot.into_iter().filter(|(k, _)| k != VERSION_FIELD) {
            changes.insert(login, serde_json::from_str(&raw)?);
        }
        Ok(Some(DirectoryDiff {
            from_version: since_version,
            to_version: current,
            changes,
        }))
    }

    /// How many diff generations are valid for the published version.
    pub async fn generation_count(&self) -> Result<u64, DirectoryError> {
        let current = self.version().await?;
        let mut count = 0;
        for backoff in 1..=self.history_depth.min(current) {
            let slot = self.cache.hgetall(&slot_key(backoff)).await?;
            if stamp(&slot) == Some(current) {
                count += 1;
            }
        }
        Ok(count)
    }
}
