//! Devices linked to an account.

use chrono::{DateTime, Utc};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Device identifier, unique within one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl DeviceId {
    /// The device that registered the account.
    pub const PRIMARY: DeviceId = DeviceId(1);

    pub fn is_primary(self) -> bool {
        self == Self::PRIMARY
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Salted SHA-256 of a device password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthCredential {
    pub hash: String,
    pub salt: String,
}

impl AuthCredential {
    /// Hash `password` under a fresh random salt.
    pub fn generate(password: &SecretString) -> Self {
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        let salt = hex::encode(salt);
        Self {
            hash: hash_secret(&salt, password.expose_secret()),
            salt,
        }
    }

    /// Check a presented password against the stored hash.
    pub fn verify(&self, password: &SecretString) -> bool {
        hash_secret(&self.salt, password.expose_secret()) == self.hash
    }
}

/// Hash a secret with its salt using SHA-256.
pub fn hash_secret(salt: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Push delivery state for a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushTokens {
    pub apn_id: Option<String>,
    pub voip_apn_id: Option<String>,
    pub gcm_id: Option<String>,
    /// The device polls for messages instead of relying on push.
    pub fetches_messages: bool,
    /// When the push provider reported the app as uninstalled.
    pub uninstalled_feedback: Option<DateTime<Utc>>,
}

impl PushTokens {
    pub fn has_token(&self) -> bool {
        self.apn_id.is_some() || self.voip_apn_id.is_some() || self.gcm_id.is_some()
    }

    /// Forget every push token and the uninstall report that triggered it.
    pub fn clear_tokens(&mut self) {
        self.apn_id = None;
        self.voip_apn_id = None;
        self.gcm_id = None;
        self.uninstalled_feedback = None;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub storage: bool,
    pub transfer: bool,
    pub sender_key: bool,
    pub announcement_group: bool,
}

/// A device owned by an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: Option<String>,
    pub credential: AuthCredential,
    pub push: PushTokens,
    pub capabilities: DeviceCapabilities,
    pub registration_id: u32,
    pub user_agent: Option<String>,
    pub created: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Device {
    /// A freshly registered device, seen now.
    pub fn new(
        id: DeviceId,
        credential: AuthCredential,
        registration_id: u32,
        user_agent: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: None,
            credential,
            push: PushTokens::default(),
            capabilities: DeviceCapabilities::default(),
            registration_id,
            user_agent,
            created: now,
            last_seen: now,
        }
    }

    /// The device can receive messages one way or another.
    pub fn is_enabled(&self) -> bool {
        self.push.fetches_messages || self.push.has_token()
    }
}
