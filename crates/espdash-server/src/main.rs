//! ESPHome Dashboard update service
//!
//! Loads stored dashboard entries, sets each one up and polls until
//! interrupted.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use espdash::{setup_entry, unload_entry, LiveVersionFeed, RuntimeData};
use espdash_entries::ConfigEntries;
use espdash_registry::{DeviceRegistry, Storage};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_dir = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("ESPDASH_CONFIG_DIR").ok())
        .unwrap_or_else(|| ".".to_string());

    info!(config_dir, "Starting ESPHome Dashboard update service");

    let storage = Arc::new(Storage::new(&config_dir));

    let registry = Arc::new(DeviceRegistry::new());
    registry.load(&storage).await?;

    let entries = Arc::new(ConfigEntries::new(storage.clone()));
    entries.load().await?;

    if entries.is_empty() {
        warn!("no dashboard entries configured; add one to .storage/espdash.config_entries");
    }

    // No sibling integration runs in the standalone service; the feed stays
    // empty and entities resolve versions from device queries and dashboard
    // data.
    let live = Arc::new(LiveVersionFeed::new());

    let mut loaded: HashMap<String, RuntimeData> = HashMap::new();
    for entry_id in entries.entry_ids() {
        match setup_entry(entries.clone(), registry.clone(), live.clone(), &entry_id).await {
            Ok(runtime) => {
                loaded.insert(entry_id, runtime);
            }
            Err(err) => warn!(entry_id = %entry_id, %err, "entry setup failed"),
        }
    }

    registry.save(&storage).await?;
    info!(entries = loaded.len(), "service is running");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    for (entry_id, runtime) in loaded {
        unload_entry(&entries, &entry_id, runtime).await;
    }
    registry.save(&storage).await?;

    Ok(())
}
