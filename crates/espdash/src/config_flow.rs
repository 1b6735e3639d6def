//! Config, reconfigure and reauth flows
//!
//! Validates a dashboard URL and optional credentials before anything is
//! persisted: URL problems are rejected without touching the network, then a
//! live probe classifies authentication failures, unreachable dashboards and
//! endpoints that are not a dashboard at all.

use std::collections::HashMap;
use std::sync::Arc;

use espdash_api::{ApiError, Dashboard, DashboardClient};
use espdash_entries::{
    ConfigEntries, ConfigEntriesError, ConfigEntriesResult, Credentials, DashboardConfig,
    DashboardEntry, EntryState,
};
use tracing::debug;
use url::Url;

pub const ERROR_INVALID_URL: &str = "invalid_url";
pub const ERROR_INVALID_AUTH: &str = "invalid_auth";
pub const ERROR_CANNOT_CONNECT: &str = "cannot_connect";
pub const ERROR_INVALID_DASHBOARD: &str = "invalid_dashboard";

pub const ABORT_ALREADY_CONFIGURED: &str = "already_configured";
pub const ABORT_REAUTH_SUCCESSFUL: &str = "reauth_successful";
pub const ABORT_RECONFIGURE_SUCCESSFUL: &str = "reconfigure_successful";

/// Result of a flow step
#[derive(Debug)]
pub enum FlowResult {
    /// Show the form again, with error codes keyed like the original flow
    /// (`base` for form-wide errors).
    Form {
        step_id: &'static str,
        errors: HashMap<String, String>,
    },
    CreateEntry {
        entry: DashboardEntry,
    },
    Abort {
        reason: &'static str,
    },
}

impl FlowResult {
    fn form(step_id: &'static str, error: &'static str) -> Self {
        FlowResult::Form {
            step_id,
            errors: HashMap::from([("base".to_string(), error.to_string())]),
        }
    }

    /// The `base` error code, for assertions and rendering.
    pub fn base_error(&self) -> Option<&str> {
        match self {
            FlowResult::Form { errors, .. } => errors.get("base").map(String::as_str),
            _ => None,
        }
    }
}

/// User-supplied form fields
#[derive(Debug, Clone, Default)]
pub struct UserInput {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

type ClientFactory = Arc<dyn Fn(&DashboardConfig) -> Arc<dyn Dashboard> + Send + Sync>;

/// Flow handler for dashboard entries
pub struct ConfigFlow {
    entries: Arc<ConfigEntries>,
    client_factory: ClientFactory,
}

impl ConfigFlow {
    pub fn new(entries: Arc<ConfigEntries>) -> Self {
        Self::with_client_factory(
            entries,
            Arc::new(|config| {
                Arc::new(DashboardClient::new(&config.url, config.basic_auth()))
                    as Arc<dyn Dashboard>
            }),
        )
    }

    /// Inject a dashboard factory, for tests.
    pub fn with_client_factory(entries: Arc<ConfigEntries>, client_factory: ClientFactory) -> Self {
        Self {
            entries,
            client_factory,
        }
    }

    /// Initial setup step.
    pub async fn step_user(&self, input: UserInput) -> ConfigEntriesResult<FlowResult> {
        let (config, title) = match self.build_config(&input) {
            Ok(built) => built,
            Err(code) => return Ok(FlowResult::form("user", code)),
        };

        if let Err(code) = self.validate(&config).await {
            return Ok(FlowResult::form("user", code));
        }

        match self.entries.add(DashboardEntry::new(title, config)).await {
            Ok(entry) => Ok(FlowResult::CreateEntry { entry }),
            Err(ConfigEntriesError::AlreadyExists { .. }) => Ok(FlowResult::Abort {
                reason: ABORT_ALREADY_CONFIGURED,
            }),
            Err(err) => Err(err),
        }
    }

    /// Change the URL and/or credentials of an existing entry in place.
    pub async fn step_reconfigure(
        &self,
        entry_id: &str,
        input: UserInput,
    ) -> ConfigEntriesResult<FlowResult> {
        let (config, title) = match self.build_config(&input) {
            Ok(built) => built,
            Err(code) => return Ok(FlowResult::form("reconfigure", code)),
        };

        if let Err(code) = self.validate(&config).await {
            return Ok(FlowResult::form("reconfigure", code));
        }

        match self
            .entries
            .update_config(entry_id, config, Some(title))
            .await
        {
            Ok(_) => {
                // The entry needs a reload to pick the new connection up.
                self.entries.set_state(entry_id, EntryState::NotLoaded, None);
                Ok(FlowResult::Abort {
                    reason: ABORT_RECONFIGURE_SUCCESSFUL,
                })
            }
            Err(ConfigEntriesError::AlreadyExists { .. }) => Ok(FlowResult::Abort {
                reason: ABORT_ALREADY_CONFIGURED,
            }),
            Err(err) => Err(err),
        }
    }

    /// Re-probe the stored URL with fresh credentials and store them.
    pub async fn step_reauth_confirm(
        &self,
        entry_id: &str,
        username: Option<String>,
        password: Option<String>,
    ) -> ConfigEntriesResult<FlowResult> {
        let entry = self
            .entries
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        let credentials = match Credentials::from_parts(username, password) {
            Ok(credentials) => credentials,
            Err(_) => return Ok(FlowResult::form("reauth_confirm", ERROR_INVALID_AUTH)),
        };

        let config = entry.config.clone().with_credentials(credentials.clone());
        if let Err(code) = self.validate(&config).await {
            return Ok(FlowResult::form("reauth_confirm", code));
        }

        self.entries.update_credentials(entry_id, credentials).await?;
        self.entries.set_state(entry_id, EntryState::NotLoaded, None);
        debug!(entry_id, "credentials updated after reauth");

        Ok(FlowResult::Abort {
            reason: ABORT_REAUTH_SUCCESSFUL,
        })
    }

    /// Parse the form into a config and entry title.
    ///
    /// URL problems are caught here, before any network traffic.
    fn build_config(
        &self,
        input: &UserInput,
    ) -> Result<(DashboardConfig, String), &'static str> {
        let trimmed = input.url.trim_end_matches('/');
        let parsed = Url::parse(trimmed).map_err(|_| ERROR_INVALID_URL)?;
        let host = parsed.host_str().ok_or(ERROR_INVALID_URL)?;

        let netloc = match parsed.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        let credentials = Credentials::from_parts(input.username.clone(), input.password.clone())
            .map_err(|_| ERROR_INVALID_AUTH)?;

        let config = DashboardConfig::new(trimmed).with_credentials(credentials);
        Ok((config, format!("ESPHome Dashboard ({netloc})")))
    }

    /// Probe the dashboard and make sure it answers like one.
    async fn validate(&self, config: &DashboardConfig) -> Result<(), &'static str> {
        let client = (self.client_factory)(config);

        client.probe().await.map_err(classify)?;
        client.devices().await.map_err(classify)?;
        Ok(())
    }
}

fn classify(err: ApiError) -> &'static str {
    if err.is_auth() {
        return ERROR_INVALID_AUTH;
    }
    match err {
        ApiError::InvalidResponse(_) => ERROR_INVALID_DASHBOARD,
        _ => ERROR_CANNOT_CONNECT,
    }
}
