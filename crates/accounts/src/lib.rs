//! Account lifecycle orchestration.
//!
//! [`AccountsManager`] is the single entry point for creating, updating and
//! deleting accounts. It keeps the durable store, the best-effort
//! [`AccountCache`], the contact-discovery directory and the dependent
//! per-account stores consistent with each other, and owns the
//! retry-on-conflict protocol for updates.

mod cache;
mod config;
mod dependents;
mod error;
mod manager;

pub use cache::AccountCache;
pub use config::ManagerConfig;
pub use dependents::{
    DependentStoreError, DependentStores, KeyStore, MessageStore, ProfileStore, UsernameStore,
};
pub use error::ManagerError;
pub use manager::{AccountsManager, DeletionReason, Registration, DIRECTORY_LEASE_KEY};
