//! Update entities
//!
//! One entity per device configured on the dashboard. An entity presents
//! availability, installed/latest firmware versions and whether an OTA
//! install is possible, and drives the compile + upload sequence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use espdash_api::ApiError;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::coordinator::{DashboardCoordinator, ListenerId};
use crate::live::{LiveVersionFeed, SubscriptionId};
use crate::resolver::VersionState;

/// Install failures, naming the failing phase and target
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("cannot install update: no address available for {device}")]
    NoAddress { device: String },

    #[error("failed to compile {configuration}")]
    CompileFailed { configuration: String },

    #[error("failed to upload to {device} at {address}")]
    UploadFailed { device: String, address: String },

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Direct device query seam.
///
/// Best-effort by contract: `None` means "version unknown for now" and is
/// never surfaced as an error.
#[async_trait]
pub trait VersionQuery: Send + Sync {
    async fn firmware_version(&self, name: &str, address: &str) -> Option<String>;
}

/// Queries devices over the native API with mDNS port discovery.
pub struct NativeVersionQuery;

#[async_trait]
impl VersionQuery for NativeVersionQuery {
    async fn firmware_version(&self, name: &str, address: &str) -> Option<String> {
        match espdash_device::firmware_version(name, address).await {
            Ok(version) => version,
            Err(err) => {
                debug!(name, %err, "direct device query failed");
                None
            }
        }
    }
}

/// Firmware update status for one configured device
pub struct UpdateEntity {
    device_name: String,
    unique_id: String,
    configuration: String,
    address: Mutex<Option<String>>,
    coordinator: Arc<DashboardCoordinator>,
    live: Arc<LiveVersionFeed>,
    query: Arc<dyn VersionQuery>,
    state: Mutex<VersionState>,
    device_id: String,
    coordinator_listener: Mutex<Option<ListenerId>>,
    live_subscription: Mutex<Option<SubscriptionId>>,
    state_generation: AtomicU64,
}

impl UpdateEntity {
    pub fn new(
        coordinator: Arc<DashboardCoordinator>,
        live: Arc<LiveVersionFeed>,
        query: Arc<dyn VersionQuery>,
        entry_id: &str,
        device_name: &str,
        configuration: &str,
        device_id: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            device_name: device_name.to_string(),
            unique_id: format!("{entry_id}_{device_name}"),
            configuration: configuration.to_string(),
            address: Mutex::new(None),
            coordinator,
            live,
            query,
            state: Mutex::new(VersionState::new()),
            device_id,
            coordinator_listener: Mutex::new(None),
            live_subscription: Mutex::new(None),
            state_generation: AtomicU64::new(0),
        })
    }

    /// Subscribe to the coordinator and pick up the current record.
    pub fn attach(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let id = self.coordinator.add_listener(Arc::new(move || {
            if let Some(entity) = weak.upgrade() {
                entity.handle_coordinator_update();
            }
        }));
        *self.coordinator_listener.lock() = Some(id);

        self.handle_coordinator_update();
    }

    /// Drop both observer registrations. Idempotent; in-flight operations
    /// are not cancelled, their results are simply discarded.
    pub fn teardown(&self) {
        if let Some(id) = self.coordinator_listener.lock().take() {
            self.coordinator.remove_listener(id);
        }
        if let Some(id) = self.live_subscription.lock().take() {
            self.live.unsubscribe(id);
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn configuration(&self) -> &str {
        &self.configuration
    }

    /// Registry id of the physical device this entity belongs to.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Bumped on every externally visible attribute change.
    pub fn state_generation(&self) -> u64 {
        self.state_generation.load(Ordering::SeqCst)
    }

    /// False while the device is missing from the latest dashboard data.
    pub fn available(&self) -> bool {
        self.coordinator.last_update_success()
            && self.coordinator.data().contains_key(&self.device_name)
    }

    /// Installed firmware version: live > cached > dashboard-deployed.
    pub fn installed_version(&self) -> Option<String> {
        let data = self.coordinator.data();
        let dashboard = data
            .get(&self.device_name)
            .and_then(|record| record.deployed_version.as_deref());
        let live = self.live.version(&self.device_name);

        self.state
            .lock()
            .installed_version(live.as_deref(), dashboard)
            .map(String::from)
    }

    /// Version the dashboard would build, falling back to the deployed one.
    pub fn latest_version(&self) -> Option<String> {
        let data = self.coordinator.data();
        let record = data.get(&self.device_name)?;
        record
            .current_version
            .clone()
            .or_else(|| record.deployed_version.clone())
    }

    /// Install is only offered when the record carries a network address.
    pub fn supports_install(&self) -> bool {
        self.address.lock().is_some()
    }

    /// Compile the configuration remotely, then upload it over OTA.
    ///
    /// Strictly two-phase: a compile failure aborts before any upload, an
    /// upload failure leaves the cached version and coordinator data
    /// untouched. Only a full success invalidates the cached tier,
    /// re-queries the device (absent a live source) and refreshes the
    /// coordinator.
    pub async fn install(&self) -> Result<(), InstallError> {
        let address = self
            .address
            .lock()
            .clone()
            .ok_or_else(|| InstallError::NoAddress {
                device: self.device_name.clone(),
            })?;

        info!(
            device = %self.device_name,
            %address,
            configuration = %self.configuration,
            "starting OTA update"
        );

        let api = self.coordinator.api();

        if !api.compile(&self.configuration).await? {
            return Err(InstallError::CompileFailed {
                configuration: self.configuration.clone(),
            });
        }

        debug!(device = %self.device_name, "compilation successful, starting upload");

        if !api.upload(&self.configuration, &address).await? {
            return Err(InstallError::UploadFailed {
                device: self.device_name.clone(),
                address,
            });
        }

        info!(device = %self.device_name, "successfully updated to latest version");

        self.state.lock().clear_cached();

        if !self.live.contains(&self.device_name) {
            // The device may still be rebooting and answer with the version
            // it is about to replace; the next cycle corrects that.
            let version = self.query.firmware_version(&self.device_name, &address).await;
            self.state.lock().store_cached(version);
        }

        if let Err(err) = self.coordinator.refresh().await {
            debug!(%err, "post-install refresh failed");
        }

        Ok(())
    }

    /// Direct device query for the cached tier, used when no live source
    /// covers this device. Soft-fails into "unknown for now".
    pub async fn refresh_device_version(&self) {
        if self.live.contains(&self.device_name) {
            return;
        }
        let Some(address) = self.address.lock().clone() else {
            return;
        };

        let version = self.query.firmware_version(&self.device_name, &address).await;
        self.state.lock().store_cached(version);
        self.write_state();
    }

    fn handle_coordinator_update(self: &Arc<Self>) {
        if let Some(record) = self.coordinator.data().get(&self.device_name) {
            *self.address.lock() = record.address.clone();
        }
        self.check_live_source();
        self.write_state();
    }

    /// Link a live source that appeared after this entity was created.
    fn check_live_source(self: &Arc<Self>) {
        if self.state.lock().live_linked() {
            return;
        }
        if !self.live.contains(&self.device_name) {
            return;
        }

        debug!(device = %self.device_name, "live device source appeared");
        self.state.lock().link_live();

        let weak = Arc::downgrade(self);
        let id = self.live.subscribe(
            &self.device_name,
            Arc::new(move || {
                if let Some(entity) = weak.upgrade() {
                    entity.write_state();
                }
            }),
        );
        *self.live_subscription.lock() = Some(id);
    }

    fn write_state(&self) {
        self.state_generation.fetch_add(1, Ordering::SeqCst);
        trace!(device = %self.device_name, "entity state updated");
    }
}
