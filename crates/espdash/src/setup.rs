//! Entry setup and unload

use std::sync::Arc;
use std::time::Duration;

use espdash_api::{Dashboard, DashboardClient};
use espdash_entries::{ConfigEntries, EntryState};
use espdash_registry::DeviceRegistry;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

use crate::coordinator::{DashboardCoordinator, RefreshError, DEFAULT_SCAN_INTERVAL};
use crate::live::LiveVersionFeed;
use crate::platform::UpdatePlatform;
use crate::update::{NativeVersionQuery, VersionQuery};

/// Entry setup failures
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("config entry not found: {0}")]
    NotFound(String),

    #[error("authentication failed, reauthentication required")]
    AuthFailed,

    #[error("could not connect to dashboard: {0}")]
    ConnectFailed(String),
}

/// Everything a loaded entry owns; dropped on unload
pub struct RuntimeData {
    pub coordinator: Arc<DashboardCoordinator>,
    pub platform: Arc<UpdatePlatform>,
    poll_task: JoinHandle<()>,
}

impl std::fmt::Debug for RuntimeData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeData").finish_non_exhaustive()
    }
}

/// Set up a dashboard entry with the real client and device query.
pub async fn setup_entry(
    entries: Arc<ConfigEntries>,
    registry: Arc<DeviceRegistry>,
    live: Arc<LiveVersionFeed>,
    entry_id: &str,
) -> Result<RuntimeData, SetupError> {
    let entry = entries
        .get(entry_id)
        .ok_or_else(|| SetupError::NotFound(entry_id.to_string()))?;

    let api: Arc<dyn Dashboard> = Arc::new(DashboardClient::new(
        &entry.config.url,
        entry.config.basic_auth(),
    ));

    setup_entry_with(
        entries,
        registry,
        live,
        entry_id,
        api,
        Arc::new(NativeVersionQuery),
        DEFAULT_SCAN_INTERVAL,
    )
    .await
}

/// Set up a dashboard entry with injected collaborators.
///
/// The first refresh runs inline so setup fails loudly: an authentication
/// failure parks the entry in `ReauthRequired`, anything else in
/// `SetupError`. On success the update platform is attached and the poll
/// loop spawned.
pub async fn setup_entry_with(
    entries: Arc<ConfigEntries>,
    registry: Arc<DeviceRegistry>,
    live: Arc<LiveVersionFeed>,
    entry_id: &str,
    api: Arc<dyn Dashboard>,
    query: Arc<dyn VersionQuery>,
    scan_interval: Duration,
) -> Result<RuntimeData, SetupError> {
    let entry = entries
        .get(entry_id)
        .ok_or_else(|| SetupError::NotFound(entry_id.to_string()))?;

    entries.set_state(entry_id, EntryState::SetupInProgress, None);

    let coordinator = Arc::new(DashboardCoordinator::new(api));

    match coordinator.refresh().await {
        Ok(()) => {}
        Err(RefreshError::AuthFailed) => {
            entries.set_state(
                entry_id,
                EntryState::ReauthRequired,
                Some("authentication failed, please update your credentials".into()),
            );
            return Err(SetupError::AuthFailed);
        }
        Err(RefreshError::UpdateFailed(message)) => {
            entries.set_state(entry_id, EntryState::SetupError, Some(message.clone()));
            return Err(SetupError::ConnectFailed(message));
        }
    }

    let platform = UpdatePlatform::new(
        entry_id,
        &entry.config.url,
        coordinator.clone(),
        live,
        registry,
        query,
    );
    platform.attach();

    let poll_task = {
        let coordinator = coordinator.clone();
        let entries = entries.clone();
        let entry_id = entry_id.to_string();
        tokio::spawn(coordinator.run(scan_interval, move || {
            entries.set_state(
                &entry_id,
                EntryState::ReauthRequired,
                Some("authentication failed, please update your credentials".into()),
            );
        }))
    };

    entries.set_state(entry_id, EntryState::Loaded, None);
    info!(entry_id, title = %entry.title, "dashboard entry set up");

    Ok(RuntimeData {
        coordinator,
        platform,
        poll_task,
    })
}

/// Unload an entry: tear down entities and stop polling.
pub async fn unload_entry(entries: &ConfigEntries, entry_id: &str, runtime: RuntimeData) {
    entries.set_state(entry_id, EntryState::UnloadInProgress, None);

    runtime.platform.teardown();
    runtime.poll_task.abort();

    entries.set_state(entry_id, EntryState::NotLoaded, None);
    info!(entry_id, "dashboard entry unloaded");
}
