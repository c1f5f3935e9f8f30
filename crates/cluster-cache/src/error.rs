//! Cache errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    /// The cache cluster could not be reached.
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    /// A scalar operation hit a hash key or the reverse.
    #[error("Wrong value type for key {0}")]
    WrongType(String),

    /// A cached value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
