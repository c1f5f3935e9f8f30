//! Crawl listener contract and its timing decorator.

use crate::error::ListenerError;
use account_store::Account;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// A housekeeping task fed by the crawler.
///
/// Listeners see chunks in uuid order. A crawl pass starts with
/// `on_crawl_start`, delivers every account exactly once through `on_chunk`,
/// and ends with `on_crawl_end`.
#[async_trait]
pub trait AccountCrawlListener: Send + Sync {
    fn name(&self) -> &str;

    async fn on_crawl_start(&self) {}

    /// `cursor` is the position the pass stopped at.
    async fn on_crawl_end(&self, _cursor: Option<Uuid>) {}

    /// Handle one chunk read after `cursor`. Returning
    /// [`ListenerError::RestartRequested`] rewinds the crawl.
    async fn on_chunk(&self, cursor: Option<Uuid>, accounts: &[Account]) -> Result<(), ListenerError>;
}

/// Callback counts and time spent in chunk processing.
#[derive(Debug, Default)]
pub struct ListenerTimings {
    starts: AtomicU64,
    ends: AtomicU64,
    chunks: AtomicU64,
    failed_chunks: AtomicU64,
    chunk_micros: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingSnapshot {
    pub starts: u64,
    pub ends: u64,
    pub chunks: u64,
    pub failed_chunks: u64,
    pub chunk_time: Duration,
}

impl ListenerTimings {
    pub fn snapshot(&self) -> TimingSnapshot {
        TimingSnapshot {
            starts: self.starts.load(Ordering::Relaxed),
            ends: self.ends.load(Ordering::Relaxed),
            chunks: self.chunks.load(Ordering::Relaxed),
            failed_chunks: self.failed_chunks.load(Ordering::Relaxed),
            chunk_time: Duration::from_micros(self.chunk_micros.load(Ordering::Relaxed)),
        }
    }
}

/// Wraps a listener and records how long each callback takes.
pub struct TimedListener<L> {
    inner: L,
    timings: Arc<ListenerTimings>,
}

impl<L: AccountCrawlListener> TimedListener<L> {
    pub fn new(inner: L, timings: Arc<ListenerTimings>) -> Self {
        Self { inner, timings }
    }
}

#[async_trait]
impl<L: AccountCrawlListener> AccountCrawlListener for TimedListener<L> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn on_crawl_start(&self) {
        let started = Instant::now();
        self.inner.on_crawl_start().await;
        self.timings.starts.fetch_add(1, Ordering::Relaxed);
        debug!(listener = self.name(), elapsed = ?started.elapsed(), "on_crawl_start");
    }

    async fn on_crawl_end(&self, cursor: Option<Uuid>) {
        let started = Instant::now();
        self.inner.on_crawl_end(cursor).await;
        self.timings.ends.fetch_add(1, Ordering::Relaxed);
        debug!(listener = self.name(), elapsed = ?started.elapsed(), "on_crawl_end");
    }

    async fn on_chunk(&self, cursor: Option<Uuid>, accounts: &[Account]) -> Result<(), ListenerError> {
        let started = Instant::now();
        let result = self.inner.on_chunk(cursor, accounts).await;
        let elapsed = started.elapsed();

        self.timings.chunks.fetch_add(1, Ordering::Relaxed);
        self.timings
            .chunk_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        if result.is_err() {
            self.timings.failed_chunks.fetch_add(1, Ordering::Relaxed);
        }
        debug!(
            listener = self.name(),
            accounts = accounts.len(),
            ?elapsed,
            "on_chunk"
        );
        result
    }
}
