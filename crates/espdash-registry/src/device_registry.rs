//! Device registry slice
//!
//! Tracks physical devices with identifiers and typed connections. The
//! update platform uses it two ways: find the MAC another integration
//! registered for a device name, and register a standalone device when no
//! such link exists.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::storage::{Storable, Storage, StorageResult};

/// Storage key for the device registry
pub const STORAGE_KEY: &str = "espdash.device_registry";
const STORAGE_VERSION: u32 = 1;
const STORAGE_MINOR_VERSION: u32 = 1;

/// Connection type for network MAC addresses
pub const CONNECTION_NETWORK_MAC: &str = "mac";

/// A device identifier (domain, id) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentifier(pub String, pub String);

impl DeviceIdentifier {
    pub fn new(domain: impl Into<String>, id: impl Into<String>) -> Self {
        Self(domain.into(), id.into())
    }

    fn key(&self) -> String {
        format!("{}:{}", self.0, self.1)
    }
}

/// A device connection (type, id) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceConnection(pub String, pub String);

impl DeviceConnection {
    /// Create a connection, normalizing MAC addresses.
    pub fn mac(address: &str) -> Self {
        Self(CONNECTION_NETWORK_MAC.to_string(), format_mac(address))
    }

    pub fn connection_type(&self) -> &str {
        &self.0
    }

    pub fn id(&self) -> &str {
        &self.1
    }

    fn key(&self) -> String {
        format!("{}:{}", self.0, self.1)
    }
}

/// Normalize a MAC address to lowercase colon-separated form.
///
/// Accepts `aa:bb:..`, `aa-bb-..`, `aabb.ccdd.eeff` and bare hex; anything
/// unrecognized is returned unchanged.
pub fn format_mac(mac: &str) -> String {
    let stripped: String = mac
        .chars()
        .filter(|c| !matches!(*c, ':' | '-' | '.'))
        .collect();

    if stripped.len() == 12 && stripped.chars().all(|c| c.is_ascii_hexdigit()) {
        let lower = stripped.to_lowercase();
        let pairs: Vec<&str> = (0..6).map(|i| &lower[i * 2..i * 2 + 2]).collect();
        return pairs.join(":");
    }

    mac.to_string()
}

/// A registered device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Registry id (ULID)
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_url: Option<String>,

    #[serde(default, skip_serializing_if = "HashSet::is_empty")]
    pub identifiers: HashSet<DeviceIdentifier>,

    #[serde(default, skip_serializing_if = "HashSet::is_empty")]
    pub connections: HashSet<DeviceConnection>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

/// Descriptive fields for registering a device
#[derive(Debug, Clone, Default)]
pub struct DeviceFields {
    pub name: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub configuration_url: Option<String>,
}

/// Registry data for storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DeviceRegistryData {
    devices: Vec<DeviceEntry>,
}

impl Storable for DeviceRegistryData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// Device registry with connection and identifier indexes
pub struct DeviceRegistry {
    devices: DashMap<String, DeviceEntry>,
    by_identifier: DashMap<String, String>,
    by_connection: DashMap<String, String>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            devices: DashMap::new(),
            by_identifier: DashMap::new(),
            by_connection: DashMap::new(),
        }
    }

    /// Load registry contents from storage.
    pub async fn load(&self, storage: &Storage) -> StorageResult<()> {
        if let Some(data) = storage.load::<DeviceRegistryData>().await? {
            info!("Loading {} devices from storage", data.devices.len());
            for device in data.devices {
                self.index_device(device);
            }
        }
        Ok(())
    }

    /// Save registry contents to storage.
    pub async fn save(&self, storage: &Storage) -> StorageResult<()> {
        let data = DeviceRegistryData {
            devices: self.devices.iter().map(|r| r.value().clone()).collect(),
        };
        storage.save(&data).await?;
        debug!("Saved {} devices to storage", self.devices.len());
        Ok(())
    }

    fn index_device(&self, device: DeviceEntry) {
        for identifier in &device.identifiers {
            self.by_identifier.insert(identifier.key(), device.id.clone());
        }
        for connection in &device.connections {
            self.by_connection.insert(connection.key(), device.id.clone());
        }
        self.devices.insert(device.id.clone(), device);
    }

    pub fn get(&self, device_id: &str) -> Option<DeviceEntry> {
        self.devices.get(device_id).map(|r| r.value().clone())
    }

    pub fn get_by_identifier(&self, identifier: &DeviceIdentifier) -> Option<DeviceEntry> {
        self.by_identifier
            .get(&identifier.key())
            .and_then(|id| self.get(&id))
    }

    pub fn get_by_connection(&self, connection: &DeviceConnection) -> Option<DeviceEntry> {
        self.by_connection
            .get(&connection.key())
            .and_then(|id| self.get(&id))
    }

    /// Find the MAC address registered for a device name.
    ///
    /// Name comparison is case-insensitive; returns the first `mac`
    /// connection of the matching device.
    pub fn find_mac_by_name(&self, name: &str) -> Option<String> {
        let wanted = name.to_lowercase();
        for device in self.devices.iter() {
            let matches = device
                .name
                .as_ref()
                .is_some_and(|n| n.to_lowercase() == wanted);
            if !matches {
                continue;
            }
            for connection in &device.connections {
                if connection.connection_type() == CONNECTION_NETWORK_MAC {
                    return Some(connection.id().to_string());
                }
            }
        }
        None
    }

    /// Register a device for an identifier, or return the existing one.
    ///
    /// Idempotent by identifier; also attaches to an existing device when a
    /// supplied connection already belongs to one.
    pub fn get_or_create(
        &self,
        identifier: DeviceIdentifier,
        connections: HashSet<DeviceConnection>,
        fields: DeviceFields,
    ) -> DeviceEntry {
        if let Some(existing) = self.get_by_identifier(&identifier) {
            return existing;
        }

        for connection in &connections {
            if let Some(mut existing) = self.get_by_connection(connection) {
                existing.identifiers.insert(identifier.clone());
                existing.modified_at = Utc::now();
                self.index_device(existing.clone());
                debug!(device_id = %existing.id, "attached identifier to existing device");
                return existing;
            }
        }

        let now = Utc::now();
        let device = DeviceEntry {
            id: ulid::Ulid::new().to_string(),
            name: fields.name,
            manufacturer: fields.manufacturer,
            model: fields.model,
            configuration_url: fields.configuration_url,
            identifiers: HashSet::from([identifier]),
            connections,
            created_at: now,
            modified_at: now,
        };

        info!(
            device_id = %device.id,
            name = device.name.as_deref().unwrap_or("<unnamed>"),
            "registered device"
        );
        self.index_device(device.clone());
        device
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_mac() {
        assert_eq!(format_mac("AA:BB:CC:DD:EE:FF"), "aa:bb:cc:dd:ee:ff");
        assert_eq!(format_mac("aa-bb-cc-dd-ee-ff"), "aa:bb:cc:dd:ee:ff");
        assert_eq!(format_mac("aabb.ccdd.eeff"), "aa:bb:cc:dd:ee:ff");
        assert_eq!(format_mac("AABBCCDDEEFF"), "aa:bb:cc:dd:ee:ff");
        // Unrecognized input passes through untouched.
        assert_eq!(format_mac("not-a-mac"), "not-a-mac");
    }

    #[test]
    fn test_get_or_create_idempotent() {
        let registry = DeviceRegistry::new();
        let identifier = DeviceIdentifier::new("esphome_dashboard", "entry1_kitchen");

        let first = registry.get_or_create(
            identifier.clone(),
            HashSet::new(),
            DeviceFields {
                name: Some("kitchen".into()),
                ..Default::default()
            },
        );
        let second = registry.get_or_create(identifier, HashSet::new(), DeviceFields::default());

        assert_eq!(first.id, second.id);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_attach_by_connection() {
        let registry = DeviceRegistry::new();
        let mac = DeviceConnection::mac("AA:BB:CC:DD:EE:FF");

        // Another integration registered the physical device first.
        let original = registry.get_or_create(
            DeviceIdentifier::new("esphome", "kitchen"),
            HashSet::from([mac.clone()]),
            DeviceFields {
                name: Some("Kitchen".into()),
                ..Default::default()
            },
        );

        let linked = registry.get_or_create(
            DeviceIdentifier::new("esphome_dashboard", "entry1_kitchen"),
            HashSet::from([mac]),
            DeviceFields::default(),
        );

        assert_eq!(original.id, linked.id);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_find_mac_by_name_case_insensitive() {
        let registry = DeviceRegistry::new();
        registry.get_or_create(
            DeviceIdentifier::new("esphome", "kitchen"),
            HashSet::from([DeviceConnection::mac("AA:BB:CC:DD:EE:FF")]),
            DeviceFields {
                name: Some("Kitchen".into()),
                ..Default::default()
            },
        );

        assert_eq!(
            registry.find_mac_by_name("kitchen").as_deref(),
            Some("aa:bb:cc:dd:ee:ff")
        );
        assert_eq!(registry.find_mac_by_name("garage"), None);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path());

        let registry = DeviceRegistry::new();
        registry.get_or_create(
            DeviceIdentifier::new("esphome", "kitchen"),
            HashSet::from([DeviceConnection::mac("AA:BB:CC:DD:EE:FF")]),
            DeviceFields {
                name: Some("Kitchen".into()),
                ..Default::default()
            },
        );
        registry.save(&storage).await.unwrap();

        let reloaded = DeviceRegistry::new();
        reloaded.load(&storage).await.unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(
            reloaded.find_mac_by_name("KITCHEN").as_deref(),
            Some("aa:bb:cc:dd:ee:ff")
        );
    }
}
