//! Contact-discovery directory mirror.
//!
//! The full `login -> entry` directory lives in the cluster cache together
//! with a version counter and a ring of precomputed diffs, so a client that
//! last synced a few versions ago can fetch one bounded diff instead of the
//! whole directory.

mod error;
mod propagator;

pub use error::DirectoryError;
pub use propagator::{
    merge_changes, DirectoryChange, DirectoryConfig, DirectoryDiff, DirectoryEntry,
    DirectoryPropagator, CURRENT_UPDATE_KEY, DEFAULT_HISTORY_DEPTH, DIRECTORY_PLAIN_KEY,
    DIRECTORY_VERSION_KEY, INCREMENTAL_UPDATE_PREFIX, VERSION_FIELD,
};
