//! Entity discovery
//!
//! Materializes one update entity per device name seen in coordinator data.
//! Creation is idempotent by name; entities are never removed once created,
//! a vanished device only renders its entity unavailable.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use espdash_registry::{
    DeviceConnection, DeviceFields, DeviceIdentifier, DeviceRegistry,
};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::coordinator::{DashboardCoordinator, ListenerId};
use crate::live::LiveVersionFeed;
use crate::update::{UpdateEntity, VersionQuery};
use crate::DOMAIN;

/// Update platform for one config entry
pub struct UpdatePlatform {
    entry_id: String,
    dashboard_url: String,
    coordinator: Arc<DashboardCoordinator>,
    live: Arc<LiveVersionFeed>,
    registry: Arc<DeviceRegistry>,
    query: Arc<dyn VersionQuery>,
    known_devices: Mutex<HashSet<String>>,
    entities: DashMap<String, Arc<UpdateEntity>>,
    listener: Mutex<Option<ListenerId>>,
}

impl UpdatePlatform {
    pub fn new(
        entry_id: &str,
        dashboard_url: &str,
        coordinator: Arc<DashboardCoordinator>,
        live: Arc<LiveVersionFeed>,
        registry: Arc<DeviceRegistry>,
        query: Arc<dyn VersionQuery>,
    ) -> Arc<Self> {
        Arc::new(Self {
            entry_id: entry_id.to_string(),
            dashboard_url: dashboard_url.trim_end_matches('/').to_string(),
            coordinator,
            live,
            registry,
            query,
            known_devices: Mutex::new(HashSet::new()),
            entities: DashMap::new(),
            listener: Mutex::new(None),
        })
    }

    /// Create entities for the current data and keep discovering on every
    /// coordinator update.
    pub fn attach(self: &Arc<Self>) {
        self.sync_entities();

        let weak = Arc::downgrade(self);
        let id = self.coordinator.add_listener(Arc::new(move || {
            if let Some(platform) = weak.upgrade() {
                platform.sync_entities();
            }
        }));
        *self.listener.lock() = Some(id);
    }

    /// Tear down the discovery listener and every entity.
    pub fn teardown(&self) {
        if let Some(id) = self.listener.lock().take() {
            self.coordinator.remove_listener(id);
        }
        for entity in self.entities.iter() {
            entity.value().teardown();
        }
    }

    pub fn entity(&self, device_name: &str) -> Option<Arc<UpdateEntity>> {
        self.entities.get(device_name).map(|r| r.value().clone())
    }

    pub fn entities(&self) -> Vec<Arc<UpdateEntity>> {
        self.entities.iter().map(|r| r.value().clone()).collect()
    }

    /// Materialize entities for device names not seen before.
    pub fn sync_entities(self: &Arc<Self>) {
        let data = self.coordinator.data();
        let mut created = Vec::new();

        {
            let mut known = self.known_devices.lock();
            for (name, record) in data.iter() {
                if known.insert(name.clone()) {
                    created.push((name.clone(), record.configuration.clone()));
                }
            }
        }

        for (name, configuration) in created {
            let device_id = self.register_device(&name);
            let entity = UpdateEntity::new(
                self.coordinator.clone(),
                self.live.clone(),
                self.query.clone(),
                &self.entry_id,
                &name,
                &configuration,
                device_id,
            );
            entity.attach();

            // Seed the cached tier off the event path; discovery is bounded
            // by its own timeout.
            let seed = entity.clone();
            tokio::spawn(async move {
                seed.refresh_device_version().await;
            });

            debug!(device = %name, "created update entity");
            self.entities.insert(name, entity);
        }

        if !self.entities.is_empty() {
            info!(count = self.entities.len(), "update entities in platform");
        }
    }

    /// Link the entity to the physical device another integration already
    /// registered (matched by MAC), or register a standalone device.
    fn register_device(&self, device_name: &str) -> String {
        let identifier = DeviceIdentifier::new(DOMAIN, format!("{}_{}", self.entry_id, device_name));

        let device = match self.registry.find_mac_by_name(device_name) {
            Some(mac) => self.registry.get_or_create(
                identifier,
                HashSet::from([DeviceConnection::mac(&mac)]),
                DeviceFields::default(),
            ),
            None => self.registry.get_or_create(
                identifier,
                HashSet::new(),
                DeviceFields {
                    name: Some(device_name.to_string()),
                    manufacturer: Some("ESPHome".to_string()),
                    configuration_url: Some(format!("{}/", self.dashboard_url)),
                    ..Default::default()
                },
            ),
        };

        device.id
    }
}
