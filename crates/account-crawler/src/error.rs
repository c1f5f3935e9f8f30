//! Crawler and listener errors.

use accounts::ManagerError;
use cluster_cache::CacheError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ListenerError {
    /// Rewind the crawl to the beginning.
    #[error("Crawl restart requested: {0}")]
    RestartRequested(String),

    #[error(transparent)]
    Manager(#[from] ManagerError),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Crawler state unavailable: {0}")]
    Cache(#[from] CacheError),

    #[error("Failed to read accounts: {0}")]
    Source(#[from] ManagerError),

    #[error("Listener {name} failed: {source}")]
    Listener {
        name: String,
        #[source]
        source: ListenerError,
    },
}
