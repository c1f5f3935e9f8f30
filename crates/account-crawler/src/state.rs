//! Crawl progress shared through the cluster cache.

use cluster_cache::{CacheError, ClusterCache, Lease, LeaseGuard};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

pub const CURSOR_KEY: &str = "AccountCrawler::cursor";
pub const LEASE_KEY: &str = "AccountCrawler::lease";
pub const ACCELERATE_KEY: &str = "AccountCrawler::accelerate";

/// Cursor, acceleration flag and lease of the crawl.
///
/// An absent cursor is the start of the table.
#[derive(Clone)]
pub struct CrawlerState {
    cache: Arc<dyn ClusterCache>,
    lease: Lease,
}

impl CrawlerState {
    pub fn new(cache: Arc<dyn ClusterCache>, lease_ttl: Duration) -> Self {
        let lease = Lease::new(cache.clone(), LEASE_KEY, lease_ttl);
        Self { cache, lease }
    }

    pub async fn cursor(&self) -> Result<Option<Uuid>, CacheError> {
        match self.cache.get(CURSOR_KEY).await? {
            Some(raw) => match raw.parse() {
                Ok(uuid) => Ok(Some(uuid)),
                Err(_) => {
                    warn!("Discarding unparseable crawl cursor {:?}", raw);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    pub async fn set_cursor(&self, cursor: Option<Uuid>) -> Result<(), CacheError> {
        match cursor {
            Some(uuid) => self.cache.set(CURSOR_KEY, &uuid.to_string(), None).await,
            None => self.cache.del(CURSOR_KEY).await.map(|_| ()),
        }
    }

    pub async fn is_accelerated(&self) -> Result<bool, CacheError> {
        Ok(self.cache.get(ACCELERATE_KEY).await?.as_deref() == Some("1"))
    }

    pub async fn set_accelerated(&self, accelerated: bool) -> Result<(), CacheError> {
        if accelerated {
            self.cache.set(ACCELERATE_KEY, "1", None).await
        } else {
            self.cache.del(ACCELERATE_KEY).await.map(|_| ())
        }
    }

    /// Try once to take the crawl lease.
    pub async fn claim(&self, owner: &str) -> Result<Option<LeaseGuard>, CacheError> {
        self.lease.try_acquire(owner).await
    }
}
