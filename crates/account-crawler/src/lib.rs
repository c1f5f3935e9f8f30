//! Distributed, resumable crawl over every account.
//!
//! One [`AccountCrawler`] runs per process. Each tick it competes for a
//! cluster-wide lease; the winner reads the next chunk of accounts after the
//! shared cursor and feeds it to the registered [`AccountCrawlListener`]s.

mod config;
mod crawler;
mod error;
mod listener;
pub mod listeners;
mod state;

pub use config::{CrawlerConfig, PushFeedbackConfig, ReaperConfig};
pub use crawler::{AccountCrawler, AccountSource, TickOutcome};
pub use error::{CrawlError, ListenerError};
pub use listener::{AccountCrawlListener, ListenerTimings, TimedListener, TimingSnapshot};
pub use state::{CrawlerState, ACCELERATE_KEY, CURSOR_KEY, LEASE_KEY};
