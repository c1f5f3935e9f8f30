//! Wiring of the account service components.

use crate::config::{Config, StoreConfig};
use account_crawler::listeners::{DirectoryReconciler, PushFeedbackProcessor, StaleAccountReaper};
use account_crawler::{AccountCrawlListener, AccountCrawler, ListenerTimings, TimedListener};
use account_store::{
    AccountStore, EncryptedSnapshot, MemoryAccountStore, ShadowStats, ShadowWriteStore,
};
use accounts::{AccountsManager, DependentStores};
use anyhow::{bail, Context, Result};
use cluster_cache::{ClusterCache, MemoryCache};
use directory::DirectoryPropagator;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A running account service.
pub struct Service {
    manager: Arc<AccountsManager>,
    crawler: Arc<AccountCrawler>,
    cache: MemoryCache,
    cleanup: JoinHandle<()>,
    shadow: Option<Arc<ShadowStats>>,
    reconciler_timings: Arc<ListenerTimings>,
    reaper_timings: Arc<ListenerTimings>,
    push_feedback_timings: Arc<ListenerTimings>,
}

/// The store the manager writes through, and the primary tables that also
/// hold the deleted-account ledger.
struct OpenedStore {
    store: Arc<dyn AccountStore>,
    primary: Arc<MemoryAccountStore>,
    shadow: Option<Arc<ShadowStats>>,
}

impl Service {
    /// Build every component from configuration. Nothing runs until
    /// [`Service::start`].
    pub async fn build(config: &Config) -> Result<Self> {
        let cache = MemoryCache::new();
        let cleanup = cache.spawn_cleanup(config.cache.cleanup_interval);
        let cluster: Arc<dyn ClusterCache> = Arc::new(cache.clone());

        let OpenedStore {
            store,
            primary,
            shadow,
        } = open_store(&config.store).await?;

        let directory = Arc::new(DirectoryPropagator::new(cluster.clone(), &config.directory));
        let manager = Arc::new(AccountsManager::new(
            store,
            cluster.clone(),
            directory,
            primary,
            DependentStores::detached(),
            config.manager.clone(),
        ));

        let reconciler_timings = Arc::new(ListenerTimings::default());
        let reaper_timings = Arc::new(ListenerTimings::default());
        let push_feedback_timings = Arc::new(ListenerTimings::default());
        // The reconciler sees each chunk before the reaper deletes from it.
        let listeners: Vec<Arc<dyn AccountCrawlListener>> = vec![
            Arc::new(TimedListener::new(
                DirectoryReconciler::new(manager.clone()),
                reconciler_timings.clone(),
            )),
            Arc::new(TimedListener::new(
                PushFeedbackProcessor::new(manager.clone(), config.push_feedback.clone()),
                push_feedback_timings.clone(),
            )),
            Arc::new(TimedListener::new(
                StaleAccountReaper::new(manager.clone(), config.reaper.clone()),
                reaper_timings.clone(),
            )),
        ];

        let crawler = Arc::new(AccountCrawler::new(
            manager.clone(),
            cluster,
            listeners,
            config.crawler.clone(),
        ));

        Ok(Self {
            manager,
            crawler,
            cache,
            cleanup,
            shadow,
            reconciler_timings,
            reaper_timings,
            push_feedback_timings,
        })
    }

    pub fn manager(&self) -> &Arc<AccountsManager> {
        &self.manager
    }

    pub fn crawler(&self) -> &Arc<AccountCrawler> {
        &self.crawler
    }

    pub fn cache(&self) -> &MemoryCache {
        &self.cache
    }

    pub fn shadow_stats(&self) -> Option<&Arc<ShadowStats>> {
        self.shadow.as_ref()
    }

    pub fn reconciler_timings(&self) -> &Arc<ListenerTimings> {
        &self.reconciler_timings
    }

    pub fn reaper_timings(&self) -> &Arc<ListenerTimings> {
        &self.reaper_timings
    }

    pub fn push_feedback_timings(&self) -> &Arc<ListenerTimings> {
        &self.push_feedback_timings
    }

    /// Start the background crawler.
    pub async fn start(&self) {
        self.crawler.start().await;
    }

    /// Stop background work and wait for it to drain.
    pub async fn shutdown(self) {
        self.crawler.stop().await;
        self.cleanup.abort();

        let reconciler = self.reconciler_timings.snapshot();
        let reaper = self.reaper_timings.snapshot();
        let push = self.push_feedback_timings.snapshot();
        info!(
            reconciler_chunks = reconciler.chunks,
            reconciler_time = ?reconciler.chunk_time,
            reaper_chunks = reaper.chunks,
            reaper_time = ?reaper.chunk_time,
            push_feedback_chunks = push.chunks,
            push_feedback_time = ?push.chunk_time,
            "Account service stopped"
        );
        if let Some(shadow) = &self.shadow {
            info!(
                mirrored = shadow.mirrored(),
                failed = shadow.failed(),
                "Shadow store totals"
            );
        }
    }
}

async fn open_store(config: &StoreConfig) -> Result<OpenedStore> {
    let primary = if config.persist {
        let snapshot = snapshot(config, config.snapshot_path.clone())?;
        Arc::new(
            MemoryAccountStore::open(snapshot)
                .await
                .context("Failed to open account store")?,
        )
    } else {
        warn!("Persistence disabled, accounts will be lost on restart");
        Arc::new(MemoryAccountStore::new())
    };

    match &config.shadow_path {
        Some(path) => {
            info!("Mirroring account writes to {:?}", path);
            let secondary = MemoryAccountStore::open(snapshot(config, path.clone())?)
                .await
                .context("Failed to open shadow account store")?;
            let shadow = ShadowWriteStore::new(primary.clone(), Arc::new(secondary));
            let stats = shadow.stats();
            Ok(OpenedStore {
                store: Arc::new(shadow),
                primary,
                shadow: Some(stats),
            })
        }
        None => Ok(OpenedStore {
            store: primary.clone(),
            primary,
            shadow: None,
        }),
    }
}

fn snapshot(config: &StoreConfig, path: PathBuf) -> Result<EncryptedSnapshot> {
    match (&config.snapshot_key, &config.snapshot_passphrase) {
        (Some(key), _) => {
            EncryptedSnapshot::from_base64_key(path, key).context("Invalid snapshot key")
        }
        (None, Some(passphrase)) => Ok(EncryptedSnapshot::from_passphrase(path, passphrase)),
        (None, None) => bail!("Snapshot persistence requires a snapshot key or passphrase"),
    }
}
