//! Direct ESPHome device queries
//!
//! Used when no live data source exists for a device: resolve the native API
//! port over mDNS (falling back to the well-known default) and ask the device
//! for its firmware version over an unauthenticated native-API session.

mod discovery;
mod native_api;

pub use discovery::{discover_port, DEFAULT_PORT, DISCOVERY_TIMEOUT, SERVICE_TYPE};
pub use native_api::{device_info, DeviceInfo};

use thiserror::Error;
use tracing::debug;

/// Errors from a direct device query
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("native API protocol error: {0}")]
    Protocol(String),
}

/// Result type for device query operations
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Query the firmware version a device reports about itself.
///
/// The port is resolved via mDNS under the device's advertised name; any
/// discovery failure falls back to [`DEFAULT_PORT`]. Connection or protocol
/// failures bubble up for the caller to degrade to the next-best version
/// source.
pub async fn firmware_version(name: &str, address: &str) -> DeviceResult<Option<String>> {
    let port = match discover_port(name).await {
        Some(port) => port,
        None => {
            debug!(name, "mDNS discovery failed, using default port");
            DEFAULT_PORT
        }
    };

    let info = device_info(address, port).await?;
    Ok(info.esphome_version)
}
