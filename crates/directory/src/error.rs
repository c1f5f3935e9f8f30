//! Directory errors.

use cluster_cache::CacheError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid directory version: {0}")]
    InvalidVersion(String),
}
