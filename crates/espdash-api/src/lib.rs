//! ESPHome Dashboard REST API client
//!
//! Thin adapter over the dashboard's HTTP endpoints: listing configured
//! devices, compiling a configuration and uploading the result over OTA.
//! Consumers should depend on the [`Dashboard`] trait rather than the
//! concrete [`DashboardClient`] so tests can inject a fake dashboard.

mod client;
mod models;

pub use client::{Dashboard, DashboardClient};
pub use models::{ConfiguredDevice, DevicesResponse, ImportableDevice};

pub use reqwest::StatusCode;
use thiserror::Error;

/// Dashboard API errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// The dashboard rejected our credentials (HTTP 401/403).
    ///
    /// Kept distinct from the other variants so callers can surface a
    /// reauthentication prompt instead of a generic connection error.
    #[error("dashboard authentication required")]
    AuthRequired,

    #[error("unexpected dashboard status: {0}")]
    Status(StatusCode),

    #[error("dashboard request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed dashboard response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Classify an HTTP status: 401/403 become [`ApiError::AuthRequired`].
    pub fn from_status(status: StatusCode) -> Self {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            ApiError::AuthRequired
        } else {
            ApiError::Status(status)
        }
    }

    /// Whether this error means credentials must be re-entered.
    pub fn is_auth(&self) -> bool {
        match self {
            ApiError::AuthRequired => true,
            ApiError::Transport(err) => err
                .status()
                .is_some_and(|s| s == StatusCode::UNAUTHORIZED || s == StatusCode::FORBIDDEN),
            _ => false,
        }
    }
}

/// Result type for dashboard API operations
pub type ApiResult<T> = Result<T, ApiError>;
