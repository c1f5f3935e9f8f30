//! The crawl engine and its background loop.

use crate::config::CrawlerConfig;
use crate::error::{CrawlError, ListenerError};
use crate::listener::AccountCrawlListener;
use crate::state::CrawlerState;
use account_store::Account;
use accounts::{AccountsManager, ManagerError};
use async_trait::async_trait;
use cluster_cache::{worker_id, ClusterCache};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Where the crawler reads accounts from, in ascending uuid order.
#[async_trait]
pub trait AccountSource: Send + Sync {
    async fn get_all_from(&self, after: Option<Uuid>, limit: usize) -> Result<Vec<Account>, ManagerError>;
}

#[async_trait]
impl AccountSource for AccountsManager {
    async fn get_all_from(&self, after: Option<Uuid>, limit: usize) -> Result<Vec<Account>, ManagerError> {
        AccountsManager::get_all_from(self, after, limit).await
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another worker holds the crawl lease.
    Skipped,
    /// A chunk was dispatched and the cursor advanced.
    Chunk { size: usize },
    /// The pass reached the end and the cursor was reset.
    Completed,
    /// A listener asked to start over.
    Restarted,
}

/// Walks the whole account table in chunks, one worker at a time across the
/// cluster, and hands each chunk to the registered listeners.
pub struct AccountCrawler {
    source: Arc<dyn AccountSource>,
    state: CrawlerState,
    listeners: Vec<Arc<dyn AccountCrawlListener>>,
    config: CrawlerConfig,
    worker_id: String,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AccountCrawler {
    pub fn new(
        source: Arc<dyn AccountSource>,
        cache: Arc<dyn ClusterCache>,
        listeners: Vec<Arc<dyn AccountCrawlListener>>,
        config: CrawlerConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let mut config = config;
        if config.chunk_size == 0 {
            warn!("Crawler chunk size 0 would never advance, using 1");
            config.chunk_size = 1;
        }
        Self {
            source,
            state: CrawlerState::new(cache, config.lease_ttl),
            listeners,
            config,
            worker_id: worker_id(),
            shutdown,
            task: Mutex::new(None),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn state(&self) -> &CrawlerState {
        &self.state
    }

    /// Ask every worker to tick at the accelerated interval until the
    /// current pass completes.
    pub async fn request_acceleration(&self) -> Result<(), CrawlError> {
        self.state.set_accelerated(true).await?;
        Ok(())
    }

    /// Run one tick: claim the lease, process a chunk, release the lease.
    pub async fn do_periodic_work(&self) -> Result<TickOutcome, CrawlError> {
        let lease = match self.state.claim(&self.worker_id).await? {
            Some(lease) => {
                debug!(token = lease.token(), "Claimed crawl lease");
                lease
            }
            None => {
                debug!("Crawl lease held elsewhere, skipping tick");
                return Ok(TickOutcome::Skipped);
            }
        };

        let result = self.process_chunk().await;

        if let Err(e) = lease.release().await {
            warn!("Failed to release crawl lease: {}", e);
        }
        result
    }

    async fn process_chunk(&self) -> Result<TickOutcome, CrawlError> {
        let cursor = self.state.cursor().await?;
        let chunk = self
            .source
            .get_all_from(cursor, self.config.chunk_size)
            .await?;

        if chunk.is_empty() {
            for listener in &self.listeners {
                listener.on_crawl_end(cursor).await;
            }
            self.state.set_cursor(None).await?;
            self.state.set_accelerated(false).await?;
            info!("Account crawl pass completed");
            return Ok(TickOutcome::Completed);
        }

        if cursor.is_none() {
            info!("Starting account crawl pass");
            for listener in &self.listeners {
                listener.on_crawl_start().await;
            }
        }

        for listener in &self.listeners {
            match listener.on_chunk(cursor, &chunk).await {
                Ok(()) => {}
                Err(ListenerError::RestartRequested(reason)) => {
                    warn!(
                        listener = listener.name(),
                        "Restarting account crawl: {}", reason
                    );
                    self.state.set_cursor(None).await?;
                    self.state.set_accelerated(false).await?;
                    return Ok(TickOutcome::Restarted);
                }
                Err(source) => {
                    return Err(CrawlError::Listener {
                        name: listener.name().to_string(),
                        source,
                    });
                }
            }
        }

        let last = chunk.last().map(|account| account.uuid);
        self.state.set_cursor(last).await?;
        debug!(size = chunk.len(), "Processed crawl chunk");
        Ok(TickOutcome::Chunk { size: chunk.len() })
    }

    async fn next_delay(&self) -> Duration {
        match self.state.is_accelerated().await {
            Ok(true) => self.config.accelerated_interval,
            Ok(false) => self.config.chunk_interval,
            Err(e) => {
                debug!("Could not read acceleration flag: {}", e);
                self.config.chunk_interval
            }
        }
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting account crawler {}, chunk size: {}, interval: {:?}",
            self.worker_id, self.config.chunk_size, self.config.chunk_interval
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.do_periodic_work().await {
                Ok(outcome) => {
                    debug!(?outcome, "Crawl tick finished");
                    self.next_delay().await
                }
                Err(e) => {
                    error!("Crawl tick failed: {}", e);
                    self.config.error_backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Account crawler {} stopped", self.worker_id);
    }

    /// Spawn the background loop. Calling it again while running is a no-op;
    /// calling it after [`stop`](Self::stop) starts a fresh loop.
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            warn!("Account crawler already started");
            return;
        }
        self.shutdown.send_replace(false);
        let receiver = self.shutdown.subscribe();
        *task = Some(tokio::spawn(self.clone().run(receiver)));
    }

    /// Signal the loop to stop, wake it if it is sleeping, and wait for it
    /// to finish its current tick.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Account crawler task failed: {}", e);
            }
        }
    }
}
