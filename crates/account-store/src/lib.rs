//! Durable account registry.
//!
//! - [`AccountStore`] is the repository contract: login/uuid uniqueness,
//!   version-stamped optimistic concurrency and the directory-version
//!   register, all written transactionally.
//! - [`MemoryAccountStore`] implements it over in-process tables, optionally
//!   sealed to disk after every commit with [`EncryptedSnapshot`].
//! - [`ShadowWriteStore`] mirrors writes into a second store while migrating.
//! - [`DeletedAccounts`] is the recently-deleted ledger, kept in the same
//!   tables as the accounts, used to give a
//!   re-registering login its previous uuid.

mod account;
mod device;
mod error;
mod ledger;
mod login;
mod memory;
mod shadow;
mod snapshot;
mod store;

pub use account::{Account, AccountAttributes};
pub use device::{hash_secret, AuthCredential, Device, DeviceCapabilities, DeviceId, PushTokens};
pub use error::StoreError;
pub use ledger::{DeletedAccount, DeletedAccounts};
pub use login::normalize_login;
pub use memory::{AccountTables, MemoryAccountStore};
pub use shadow::{ShadowStats, ShadowWriteStore};
pub use snapshot::EncryptedSnapshot;
pub use store::AccountStore;
