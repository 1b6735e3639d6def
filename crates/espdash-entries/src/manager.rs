//! Config entries manager

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use espdash_registry::{Storable, Storage, StorageError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::entry::{Credentials, DashboardConfig, DashboardEntry, EntryState};

/// Storage key for config entries
pub const STORAGE_KEY: &str = "espdash.config_entries";
const STORAGE_VERSION: u32 = 1;
const STORAGE_MINOR_VERSION: u32 = 1;

/// Config entries errors
#[derive(Debug, Error)]
pub enum ConfigEntriesError {
    #[error("entry not found: {0}")]
    NotFound(String),

    #[error("an entry already exists for {url}")]
    AlreadyExists { url: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type ConfigEntriesResult<T> = Result<T, ConfigEntriesError>;

/// Config entries data for storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigEntriesData {
    entries: Vec<DashboardEntry>,
}

impl Storable for ConfigEntriesData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// Manager for dashboard config entries
///
/// Keeps a primary index by entry id and a uniqueness index by dashboard
/// URL, and persists every mutation.
pub struct ConfigEntries {
    storage: Arc<Storage>,
    entries: DashMap<String, DashboardEntry>,
    by_url: DashMap<String, String>,
}

impl ConfigEntries {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            entries: DashMap::new(),
            by_url: DashMap::new(),
        }
    }

    /// Load entries from storage. Lifecycle state resets to `NotLoaded`.
    pub async fn load(&self) -> ConfigEntriesResult<()> {
        if let Some(data) = self.storage.load::<ConfigEntriesData>().await? {
            info!("Loading {} config entries from storage", data.entries.len());
            for entry in data.entries {
                self.index_entry(&entry);
            }
        }
        Ok(())
    }

    /// Save entries to storage.
    pub async fn save(&self) -> ConfigEntriesResult<()> {
        let data = ConfigEntriesData {
            entries: self.entries.iter().map(|r| r.value().clone()).collect(),
        };
        self.storage.save(&data).await?;
        debug!("Saved {} config entries to storage", self.entries.len());
        Ok(())
    }

    fn index_entry(&self, entry: &DashboardEntry) {
        self.by_url
            .insert(entry.unique_id.clone(), entry.entry_id.clone());
        self.entries.insert(entry.entry_id.clone(), entry.clone());
    }

    fn unindex_entry(&self, entry: &DashboardEntry) {
        self.by_url.remove(&entry.unique_id);
        self.entries.remove(&entry.entry_id);
    }

    pub fn get(&self, entry_id: &str) -> Option<DashboardEntry> {
        self.entries.get(entry_id).map(|r| r.value().clone())
    }

    pub fn get_by_url(&self, url: &str) -> Option<DashboardEntry> {
        self.by_url
            .get(url.trim_end_matches('/'))
            .and_then(|id| self.get(&id))
    }

    /// Add a new entry. One entry per dashboard URL.
    pub async fn add(&self, entry: DashboardEntry) -> ConfigEntriesResult<DashboardEntry> {
        if self.by_url.contains_key(&entry.unique_id) {
            return Err(ConfigEntriesError::AlreadyExists {
                url: entry.unique_id.clone(),
            });
        }

        self.index_entry(&entry);
        self.save().await?;

        info!(
            "Added config entry: {} [{}]",
            entry.title, entry.entry_id
        );
        Ok(entry)
    }

    /// Replace an entry's connection config (reconfigure flow).
    ///
    /// The uniqueness index follows the URL; moving an entry onto a URL that
    /// already belongs to a different entry is rejected.
    pub async fn update_config(
        &self,
        entry_id: &str,
        config: DashboardConfig,
        title: Option<String>,
    ) -> ConfigEntriesResult<DashboardEntry> {
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if let Some(other) = self.by_url.get(&config.url) {
            if other.value() != entry_id {
                return Err(ConfigEntriesError::AlreadyExists { url: config.url });
            }
        }

        self.unindex_entry(&entry);

        let mut updated = entry;
        updated.unique_id = config.url.clone();
        updated.config = config;
        if let Some(title) = title {
            updated.title = title;
        }
        updated.modified_at = Utc::now();

        self.index_entry(&updated);
        self.save().await?;

        debug!("Updated config entry: {}", entry_id);
        Ok(updated)
    }

    /// Update stored credentials in place (reauth flow).
    pub async fn update_credentials(
        &self,
        entry_id: &str,
        credentials: Option<Credentials>,
    ) -> ConfigEntriesResult<DashboardEntry> {
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        let config = entry.config.clone().with_credentials(credentials);
        self.update_config(entry_id, config, None).await
    }

    /// Remove an entry.
    pub async fn remove(&self, entry_id: &str) -> ConfigEntriesResult<DashboardEntry> {
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        self.unindex_entry(&entry);
        self.save().await?;

        info!("Removed config entry: {} [{}]", entry.title, entry_id);
        Ok(entry)
    }

    /// Set entry lifecycle state.
    pub fn set_state(&self, entry_id: &str, state: EntryState, reason: Option<String>) {
        if let Some(mut entry) = self.entries.get_mut(entry_id) {
            entry.state = state;
            entry.reason = reason;
            debug!("Entry {} state changed to {:?}", entry_id, state);
        }
    }

    pub fn entry_ids(&self) -> Vec<String> {
        self.entries.iter().map(|r| r.key().clone()).collect()
    }

    /// Entries that need the user to re-enter credentials.
    pub fn reauth_required(&self) -> HashSet<String> {
        self.entries
            .iter()
            .filter(|r| r.value().state == EntryState::ReauthRequired)
            .map(|r| r.key().clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = DashboardEntry> + '_ {
        self.entries.iter().map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
