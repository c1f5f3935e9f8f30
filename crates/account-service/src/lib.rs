//! Account service: the account store, cluster cache, directory propagation
//! and housekeeping crawler wired together.

pub mod config;
pub mod service;

pub use config::Config;
pub use service::Service;
