//! Config entry types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Basic-auth credentials for a dashboard.
///
/// Username and password travel together; a half-set pair is
/// unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Pair up optional form inputs; `None` when both are empty, an error
    /// when only one side was supplied.
    pub fn from_parts(
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Option<Self>, IncompleteCredentials> {
        let username = username.filter(|s| !s.is_empty());
        let password = password.filter(|s| !s.is_empty());
        match (username, password) {
            (Some(username), Some(password)) => Ok(Some(Self { username, password })),
            (None, None) => Ok(None),
            _ => Err(IncompleteCredentials),
        }
    }
}

/// A username without a password, or the other way around
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("username and password must be provided together")]
pub struct IncompleteCredentials;

/// Connection configuration for one dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardConfig {
    /// Dashboard base URL, stored without a trailing slash
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

impl DashboardConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Credentials as the (username, password) pair HTTP clients want.
    pub fn basic_auth(&self) -> Option<(String, String)> {
        self.credentials
            .as_ref()
            .map(|c| (c.username.clone(), c.password.clone()))
    }
}

/// Config entry lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// Initial state, not yet set up
    #[default]
    NotLoaded,
    /// Currently being configured
    SetupInProgress,
    /// Successfully set up
    Loaded,
    /// Setup failed
    SetupError,
    /// Dashboard rejected the stored credentials
    ReauthRequired,
    /// Currently unloading
    UnloadInProgress,
}

impl EntryState {
    /// Check if the entry can be unloaded/reloaded from this state
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EntryState::NotLoaded
                | EntryState::Loaded
                | EntryState::SetupError
                | EntryState::ReauthRequired
        )
    }
}

/// How the entry came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    /// Configured by the user
    #[default]
    User,
    /// Re-authentication flow
    Reauth,
    /// User reconfiguring an existing entry
    Reconfigure,
}

/// A configured dashboard connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardEntry {
    /// Unique identifier (ULID)
    pub entry_id: String,

    /// Human-readable display name
    pub title: String,

    /// Duplicate-prevention key: the dashboard URL
    pub unique_id: String,

    /// Connection configuration
    pub config: DashboardConfig,

    /// Origin of the entry
    #[serde(default)]
    pub source: EntrySource,

    /// Current lifecycle state (not persisted)
    #[serde(skip, default)]
    pub state: EntryState,

    /// Human-readable explanation for failed states (not persisted)
    #[serde(skip, default)]
    pub reason: Option<String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

impl DashboardEntry {
    /// Create a new entry; the config URL doubles as the unique id.
    pub fn new(title: impl Into<String>, config: DashboardConfig) -> Self {
        let now = Utc::now();
        Self {
            entry_id: ulid::Ulid::new().to_string(),
            title: title.into(),
            unique_id: config.url.clone(),
            config,
            source: EntrySource::User,
            state: EntryState::NotLoaded,
            reason: None,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn with_source(mut self, source: EntrySource) -> Self {
        self.source = source;
        self
    }

    pub fn is_loaded(&self) -> bool {
        self.state == EntryState::Loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_from_parts() {
        assert_eq!(Credentials::from_parts(None, None).unwrap(), None);
        assert_eq!(
            Credentials::from_parts(Some("admin".into()), Some("secret".into())).unwrap(),
            Some(Credentials::new("admin", "secret"))
        );
        // Empty strings count as absent.
        assert_eq!(
            Credentials::from_parts(Some(String::new()), None).unwrap(),
            None
        );
    }

    #[test]
    fn test_half_pair_rejected() {
        assert!(Credentials::from_parts(Some("admin".into()), None).is_err());
        assert!(Credentials::from_parts(None, Some("secret".into())).is_err());
    }

    #[test]
    fn test_config_url_trimmed() {
        let config = DashboardConfig::new("http://dash.local:6052/");
        assert_eq!(config.url, "http://dash.local:6052");
    }

    #[test]
    fn test_entry_new() {
        let entry = DashboardEntry::new(
            "ESPHome Dashboard (dash.local:6052)",
            DashboardConfig::new("http://dash.local:6052"),
        );
        assert_eq!(entry.unique_id, "http://dash.local:6052");
        assert_eq!(entry.state, EntryState::NotLoaded);
        assert!(!entry.entry_id.is_empty());
    }

    #[test]
    fn test_state_not_persisted() {
        let mut entry =
            DashboardEntry::new("Dash", DashboardConfig::new("http://dash.local:6052"));
        entry.state = EntryState::Loaded;

        let json = serde_json::to_string(&entry).unwrap();
        let parsed: DashboardEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.state, EntryState::NotLoaded);
        assert_eq!(parsed.unique_id, entry.unique_id);
    }

    #[test]
    fn test_state_recoverable() {
        assert!(EntryState::NotLoaded.is_recoverable());
        assert!(EntryState::Loaded.is_recoverable());
        assert!(EntryState::SetupError.is_recoverable());
        assert!(EntryState::ReauthRequired.is_recoverable());

        assert!(!EntryState::SetupInProgress.is_recoverable());
        assert!(!EntryState::UnloadInProgress.is_recoverable());
    }
}
