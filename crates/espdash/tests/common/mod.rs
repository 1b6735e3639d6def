//! Common test utilities: a scriptable dashboard and device query

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use espdash::{
    setup_entry_with, LiveVersionFeed, RuntimeData, SetupError, VersionQuery,
};
use espdash_api::{ApiError, ApiResult, ConfiguredDevice, Dashboard, DevicesResponse};
use espdash_entries::{ConfigEntries, DashboardConfig, DashboardEntry};
use espdash_registry::{DeviceRegistry, Storage};
use parking_lot::Mutex;
use tempfile::TempDir;

/// Dashboard fake with programmable responses and call counters
pub struct MockDashboard {
    devices: Mutex<Vec<ConfiguredDevice>>,
    auth_fail: AtomicBool,
    compile_ok: AtomicBool,
    upload_ok: AtomicBool,
    pub devices_calls: AtomicUsize,
    pub compile_calls: AtomicUsize,
    pub upload_calls: AtomicUsize,
}

impl MockDashboard {
    pub fn new(devices: Vec<ConfiguredDevice>) -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new(devices),
            auth_fail: AtomicBool::new(false),
            compile_ok: AtomicBool::new(true),
            upload_ok: AtomicBool::new(true),
            devices_calls: AtomicUsize::new(0),
            compile_calls: AtomicUsize::new(0),
            upload_calls: AtomicUsize::new(0),
        })
    }

    pub fn set_devices(&self, devices: Vec<ConfiguredDevice>) {
        *self.devices.lock() = devices;
    }

    pub fn set_auth_fail(&self, fail: bool) {
        self.auth_fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_compile_ok(&self, ok: bool) {
        self.compile_ok.store(ok, Ordering::SeqCst);
    }

    pub fn set_upload_ok(&self, ok: bool) {
        self.upload_ok.store(ok, Ordering::SeqCst);
    }
}

#[async_trait]
impl Dashboard for MockDashboard {
    async fn probe(&self) -> ApiResult<()> {
        if self.auth_fail.load(Ordering::SeqCst) {
            return Err(ApiError::AuthRequired);
        }
        Ok(())
    }

    async fn devices(&self) -> ApiResult<DevicesResponse> {
        self.devices_calls.fetch_add(1, Ordering::SeqCst);
        if self.auth_fail.load(Ordering::SeqCst) {
            return Err(ApiError::AuthRequired);
        }
        Ok(DevicesResponse {
            configured: self.devices.lock().clone(),
            importable: vec![],
        })
    }

    async fn compile(&self, _configuration: &str) -> ApiResult<bool> {
        self.compile_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.compile_ok.load(Ordering::SeqCst))
    }

    async fn upload(&self, _configuration: &str, _address: &str) -> ApiResult<bool> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.upload_ok.load(Ordering::SeqCst))
    }
}

/// Device query fake with a programmable answer
pub struct FakeVersionQuery {
    version: Mutex<Option<String>>,
    pub calls: AtomicUsize,
}

impl FakeVersionQuery {
    pub fn new(version: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            version: Mutex::new(version.map(String::from)),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_version(&self, version: Option<&str>) {
        *self.version.lock() = version.map(String::from);
    }
}

#[async_trait]
impl VersionQuery for FakeVersionQuery {
    async fn firmware_version(&self, _name: &str, _address: &str) -> Option<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.version.lock().clone()
    }
}

/// A fully wired entry with fakes behind every network seam
pub struct Harness {
    pub _dir: TempDir,
    pub entries: Arc<ConfigEntries>,
    pub registry: Arc<DeviceRegistry>,
    pub live: Arc<LiveVersionFeed>,
    pub api: Arc<MockDashboard>,
    pub query: Arc<FakeVersionQuery>,
    pub entry_id: String,
}

impl Harness {
    pub async fn new(devices: Vec<ConfiguredDevice>, query_version: Option<&str>) -> Self {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(dir.path()));
        let entries = Arc::new(ConfigEntries::new(storage));

        let entry = entries
            .add(DashboardEntry::new(
                "ESPHome Dashboard (dash.local:6052)",
                DashboardConfig::new("http://dash.local:6052"),
            ))
            .await
            .unwrap();

        Self {
            _dir: dir,
            entries,
            registry: Arc::new(DeviceRegistry::new()),
            live: Arc::new(LiveVersionFeed::new()),
            api: MockDashboard::new(devices),
            query: FakeVersionQuery::new(query_version),
            entry_id: entry.entry_id,
        }
    }

    pub async fn setup(&self) -> Result<RuntimeData, SetupError> {
        let runtime = setup_entry_with(
            self.entries.clone(),
            self.registry.clone(),
            self.live.clone(),
            &self.entry_id,
            self.api.clone(),
            self.query.clone(),
            // Keep the loop quiet during tests; refreshes are driven
            // explicitly.
            Duration::from_secs(3600),
        )
        .await?;

        // Let spawned cached-tier seeds finish.
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(runtime)
    }
}

/// Device record used across scenarios
pub fn kitchen() -> ConfiguredDevice {
    let mut device = ConfiguredDevice::new("kitchen", "kitchen.yaml");
    device.address = Some("10.0.0.5".to_string());
    device.deployed_version = Some("1.0".to_string());
    device.current_version = Some("1.1".to_string());
    device
}
