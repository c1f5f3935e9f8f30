//! The account aggregate.

use crate::device::{Device, DeviceCapabilities, DeviceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Registration-time attributes supplied by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountAttributes {
    pub registration_id: u32,
    pub fetches_messages: bool,
    pub name: Option<String>,
    pub discoverable: bool,
    pub unrestricted_unidentified_access: bool,
    pub capabilities: DeviceCapabilities,
}

impl Default for AccountAttributes {
    fn default() -> Self {
        Self {
            registration_id: 0,
            fetches_messages: true,
            name: None,
            discoverable: true,
            unrestricted_unidentified_access: false,
            capabilities: DeviceCapabilities::default(),
        }
    }
}

/// A registered account and the devices it owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Stable identity; never changes once assigned.
    pub uuid: Uuid,

    /// E.164 login; changes only by re-registration.
    pub login: String,

    /// Optimistic concurrency token, bumped by every accepted update.
    pub version: u64,

    pub devices: BTreeMap<DeviceId, Device>,

    pub profile_name: Option<String>,

    /// Whether the login is published in the contact-discovery directory.
    pub discoverable: bool,

    pub unrestricted_unidentified_access: bool,
}

impl Account {
    /// Build a new account around its primary device.
    pub fn new(uuid: Uuid, login: String, primary: Device, attributes: &AccountAttributes) -> Self {
        let mut devices = BTreeMap::new();
        devices.insert(primary.id, primary);
        Self {
            uuid,
            login,
            version: 0,
            devices,
            profile_name: attributes.name.clone(),
            discoverable: attributes.discoverable,
            unrestricted_unidentified_access: attributes.unrestricted_unidentified_access,
        }
    }

    pub fn primary_device(&self) -> Option<&Device> {
        self.devices.get(&DeviceId::PRIMARY)
    }

    pub fn device_mut(&mut self, id: DeviceId) -> Option<&mut Device> {
        self.devices.get_mut(&id)
    }

    /// The primary device exists and can receive messages.
    pub fn is_enabled(&self) -> bool {
        self.primary_device().is_some_and(Device::is_enabled)
    }

    pub fn is_visible_in_directory(&self) -> bool {
        self.discoverable && self.is_enabled()
    }

    /// Most recent activity across all devices.
    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.devices.values().map(|d| d.last_seen).max()
    }
}
