//! Repairs the cached directory from the account store.
//!
//! Account writes publish their own directory changes, but those land in the
//! cluster cache on a best-effort basis. A cache restart or an outage during
//! a write leaves the directory short of what the store holds. Each pass
//! re-lists what is missing, withdraws what the store no longer backs and
//! publishes the repair as one directory version.

use crate::error::ListenerError;
use crate::listener::AccountCrawlListener;
use account_store::Account;
use accounts::AccountsManager;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Register ahead of listeners that delete accounts, so a chunk is
/// reconciled before anything in it is removed.
pub struct DirectoryReconciler {
    manager: Arc<AccountsManager>,
    pending: AtomicUsize,
}

impl DirectoryReconciler {
    pub fn new(manager: Arc<AccountsManager>) -> Self {
        Self {
            manager,
            pending: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AccountCrawlListener for DirectoryReconciler {
    fn name(&self) -> &str {
        "directory_reconciler"
    }

    async fn on_crawl_end(&self, _cursor: Option<Uuid>) {
        match self.manager.sweep_directory().await {
            Ok(withdrawn) => {
                self.pending.fetch_add(withdrawn, Ordering::Relaxed);
            }
            Err(e) => warn!("Directory sweep failed: {}", e),
        }

        let pending = self.pending.swap(0, Ordering::Relaxed);
        if pending == 0 {
            return;
        }
        match self.manager.publish_directory_changes().await {
            Ok(version) => info!(
                "Published {} reconciled directory changes as version {}",
                pending, version
            ),
            Err(e) => {
                warn!("Failed to publish reconciled directory changes: {}", e);
                self.pending.fetch_add(pending, Ordering::Relaxed);
            }
        }
    }

    async fn on_chunk(&self, _cursor: Option<Uuid>, accounts: &[Account]) -> Result<(), ListenerError> {
        match self.manager.reconcile_directory(accounts).await {
            Ok(staged) => {
                self.pending.fetch_add(staged, Ordering::Relaxed);
            }
            Err(e) => warn!("Directory reconciliation skipped a chunk: {}", e),
        }
        Ok(())
    }
}
