//! HTTP client for the ESPHome Dashboard

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::json;
use tracing::debug;

use crate::models::DevicesResponse;
use crate::{ApiError, ApiResult};

/// Dashboard API operations consumed by the coordinator and update entities.
///
/// `compile`/`upload` return `Ok(false)` when the dashboard reports the
/// operation itself failed (bad YAML, unreachable device); transport and
/// authentication problems are errors.
#[async_trait]
pub trait Dashboard: Send + Sync {
    /// Liveness probe against the dashboard root.
    async fn probe(&self) -> ApiResult<()>;

    /// Fetch the devices listing.
    async fn devices(&self) -> ApiResult<DevicesResponse>;

    /// Compile a configuration remotely.
    async fn compile(&self, configuration: &str) -> ApiResult<bool>;

    /// Upload a compiled configuration to a device address over OTA.
    async fn upload(&self, configuration: &str, address: &str) -> ApiResult<bool>;
}

/// Client for a single dashboard instance
#[derive(Debug, Clone)]
pub struct DashboardClient {
    client: Client,
    base_url: String,
    credentials: Option<(String, String)>,
}

impl DashboardClient {
    /// Create a client for `base_url`, optionally with basic-auth credentials.
    pub fn new(base_url: &str, credentials: Option<(String, String)>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    /// The dashboard base URL, without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some((username, password)) => request.basic_auth(username, Some(password)),
            None => request,
        }
    }

    async fn get(&self, path: &str) -> ApiResult<Response> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.authorized(self.client.get(&url)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::from_status(status));
        }
        Ok(response)
    }

    /// POST a JSON body and report whether the dashboard accepted it.
    ///
    /// Authentication failures are still errors so the caller can tell
    /// "dashboard said no" apart from "credentials expired".
    async fn post_ok(&self, path: &str, body: serde_json::Value) -> ApiResult<bool> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }
        match ApiError::from_status(status) {
            ApiError::AuthRequired => Err(ApiError::AuthRequired),
            _ => {
                debug!(%url, %status, "dashboard rejected request");
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl Dashboard for DashboardClient {
    async fn probe(&self) -> ApiResult<()> {
        self.get("/").await?;
        Ok(())
    }

    async fn devices(&self) -> ApiResult<DevicesResponse> {
        let response = self.get("/devices").await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|err| ApiError::InvalidResponse(err.to_string()))
    }

    async fn compile(&self, configuration: &str) -> ApiResult<bool> {
        debug!(configuration, "requesting remote compile");
        self.post_ok("/compile", json!({ "configuration": configuration }))
            .await
    }

    async fn upload(&self, configuration: &str, address: &str) -> ApiResult<bool> {
        debug!(configuration, address, "requesting OTA upload");
        // The dashboard takes the OTA target under the `port` key.
        self.post_ok(
            "/upload",
            json!({ "configuration": configuration, "port": address }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_base_url_trimmed() {
        let client = DashboardClient::new("http://dash.local:6052/", None);
        assert_eq!(client.base_url(), "http://dash.local:6052");

        let client = DashboardClient::new("http://dash.local:6052", None);
        assert_eq!(client.base_url(), "http://dash.local:6052");
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            ApiError::from_status(StatusCode::UNAUTHORIZED),
            ApiError::AuthRequired
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::FORBIDDEN),
            ApiError::AuthRequired
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::INTERNAL_SERVER_ERROR),
            ApiError::Status(StatusCode::INTERNAL_SERVER_ERROR)
        ));
    }

    #[test]
    fn test_is_auth() {
        assert!(ApiError::AuthRequired.is_auth());
        assert!(!ApiError::Status(StatusCode::BAD_GATEWAY).is_auth());
        assert!(!ApiError::InvalidResponse("not json".into()).is_auth());
    }
}
