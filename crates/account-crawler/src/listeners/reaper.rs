//! Deletes accounts nobody has used for a long time.

use crate::config::ReaperConfig;
use crate::error::ListenerError;
use crate::listener::AccountCrawlListener;
use account_store::Account;
use accounts::{AccountsManager, DeletionReason};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub struct StaleAccountReaper {
    manager: Arc<AccountsManager>,
    config: ReaperConfig,
}

impl StaleAccountReaper {
    pub fn new(manager: Arc<AccountsManager>, config: ReaperConfig) -> Self {
        Self { manager, config }
    }

    fn cutoff(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, ListenerError> {
        let max_idle = chrono::Duration::from_std(self.config.max_idle)
            .map_err(|e| ListenerError::Other(format!("invalid max_idle: {}", e)))?;
        Ok(now.checked_sub_signed(max_idle))
    }
}

/// No device activity since `cutoff`. An account without devices counts.
fn is_stale(account: &Account, cutoff: DateTime<Utc>) -> bool {
    account.last_seen().map_or(true, |seen| seen < cutoff)
}

#[async_trait]
impl AccountCrawlListener for StaleAccountReaper {
    fn name(&self) -> &str {
        "stale_account_reaper"
    }

    /// Expire the deleted-account ledger once per pass, whether or not
    /// reaping is enabled.
    async fn on_crawl_end(&self, _cursor: Option<Uuid>) {
        if let Err(e) = self.manager.prune_deleted_accounts().await {
            warn!("Failed to prune deleted accounts: {}", e);
        }
    }

    async fn on_chunk(&self, _cursor: Option<Uuid>, accounts: &[Account]) -> Result<(), ListenerError> {
        if !self.config.enabled {
            return Ok(());
        }
        let cutoff = match self.cutoff(Utc::now())? {
            Some(cutoff) => cutoff,
            None => return Ok(()),
        };

        let stale: Vec<Account> = accounts
            .iter()
            .filter(|account| is_stale(account, cutoff))
            .take(self.config.max_deletions_per_chunk)
            .cloned()
            .collect();
        if stale.is_empty() {
            return Ok(());
        }

        self.manager.delete(&stale, DeletionReason::Expired).await?;
        info!("Reaped {} accounts idle since before {}", stale.len(), cutoff);
        Ok(())
    }
}
