//! Polling coordinator for dashboard data

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use espdash_api::{ConfiguredDevice, Dashboard};
use indexmap::IndexMap;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Default poll interval
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(300);

/// Devices indexed by name, in dashboard order
pub type DeviceMap = IndexMap<String, ConfiguredDevice>;

/// Identifier for a coordinator listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn() + Send + Sync>;

/// Refresh failure classification
#[derive(Debug, Error)]
pub enum RefreshError {
    /// The dashboard rejected our credentials; the user must reauthenticate.
    /// Never retried silently.
    #[error("authentication failed, reauthentication required")]
    AuthFailed,

    /// Transient failure; retried on the next interval without tearing
    /// anything down.
    #[error("error communicating with dashboard: {0}")]
    UpdateFailed(String),
}

/// Fetches the device list on a fixed interval and on demand, and fans the
/// result out to listeners.
pub struct DashboardCoordinator {
    api: Arc<dyn Dashboard>,
    data: RwLock<Arc<DeviceMap>>,
    listeners: DashMap<u64, Listener>,
    next_listener_id: AtomicU64,
    last_update_success: AtomicBool,
    refresh_requested: Notify,
}

impl DashboardCoordinator {
    pub fn new(api: Arc<dyn Dashboard>) -> Self {
        Self {
            api,
            data: RwLock::new(Arc::new(DeviceMap::new())),
            listeners: DashMap::new(),
            next_listener_id: AtomicU64::new(1),
            last_update_success: AtomicBool::new(false),
            refresh_requested: Notify::new(),
        }
    }

    /// The dashboard API handle, shared with entities for installs.
    pub fn api(&self) -> Arc<dyn Dashboard> {
        self.api.clone()
    }

    /// Snapshot of the latest successful fetch.
    pub fn data(&self) -> Arc<DeviceMap> {
        self.data.read().clone()
    }

    pub fn last_update_success(&self) -> bool {
        self.last_update_success.load(Ordering::SeqCst)
    }

    /// Register a listener invoked synchronously after each successful fetch.
    pub fn add_listener(&self, listener: Listener) -> ListenerId {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.insert(id, listener);
        ListenerId(id)
    }

    /// Remove a listener. Safe to call with an already-removed id.
    pub fn remove_listener(&self, id: ListenerId) {
        self.listeners.remove(&id.0);
    }

    /// Ask the poll loop to fetch now instead of waiting for the next tick.
    pub fn request_refresh(&self) {
        self.refresh_requested.notify_one();
    }

    /// Fetch the device list once and publish it.
    ///
    /// Within one fetch the mapping is keyed by device name; a later record
    /// for the same name replaces an earlier one.
    pub async fn refresh(&self) -> Result<(), RefreshError> {
        let response = match self.api.devices().await {
            Ok(response) => response,
            Err(err) => {
                self.last_update_success.store(false, Ordering::SeqCst);
                if err.is_auth() {
                    return Err(RefreshError::AuthFailed);
                }
                return Err(RefreshError::UpdateFailed(err.to_string()));
            }
        };

        let mut devices = DeviceMap::new();
        for device in response.configured {
            devices.insert(device.name.clone(), device);
        }

        debug!(count = devices.len(), "fetched configured devices");
        *self.data.write() = Arc::new(devices);
        self.last_update_success.store(true, Ordering::SeqCst);

        self.notify_listeners();
        Ok(())
    }

    fn notify_listeners(&self) {
        // Snapshot first: a listener may register further listeners (entity
        // discovery does) and must not run under the map's shard locks.
        let listeners: Vec<Listener> = self.listeners.iter().map(|l| l.value().clone()).collect();
        for listener in listeners {
            listener();
        }
    }

    /// Poll until an authentication failure.
    ///
    /// One fetch is in flight at a time: the loop alternates between the
    /// interval tick and explicit refresh requests. Transient failures are
    /// logged and retried next tick; an authentication failure invokes
    /// `on_auth_failed` and stops the loop.
    pub async fn run(self: Arc<Self>, interval: Duration, on_auth_failed: impl Fn() + Send) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of a tokio interval fires immediately; setup has
        // already done the first refresh.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.refresh_requested.notified() => {}
            }

            match self.refresh().await {
                Ok(()) => {}
                Err(RefreshError::AuthFailed) => {
                    warn!("dashboard authentication failed, stopping poll loop");
                    on_auth_failed();
                    return;
                }
                Err(RefreshError::UpdateFailed(message)) => {
                    warn!(%message, "dashboard refresh failed");
                }
            }
        }
    }
}
