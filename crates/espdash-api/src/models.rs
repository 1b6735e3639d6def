//! Wire models for the dashboard's devices listing

use serde::{Deserialize, Serialize};

/// A device configured on the dashboard.
///
/// Only `name` and `configuration` are always present; everything else
/// depends on whether the dashboard has seen the device online and parsed
/// its YAML recently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfiguredDevice {
    /// Device name, the key the dashboard indexes by
    pub name: String,

    /// YAML configuration filename (e.g. `kitchen.yaml`)
    pub configuration: String,

    /// Network address for OTA uploads, if the device is reachable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Firmware version currently running on the device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_version: Option<String>,

    /// Version the YAML configuration would build
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version: Option<String>,

    /// Path of the configuration file on the dashboard host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Embedded web server port, if enabled in the configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_port: Option<u16>,

    /// Integrations loaded by the configuration
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub loaded_integrations: Vec<String>,
}

impl ConfiguredDevice {
    /// Minimal record for tests and fixtures.
    pub fn new(name: impl Into<String>, configuration: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            configuration: configuration.into(),
            address: None,
            deployed_version: None,
            current_version: None,
            path: None,
            web_port: None,
            loaded_integrations: Vec::new(),
        }
    }
}

/// A device the dashboard discovered on the network but has no YAML for.
///
/// Parsed because the dashboard sends it alongside the configured list; the
/// update platform itself only consumes configured devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportableDevice {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_import_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

/// Response of the dashboard's devices listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevicesResponse {
    pub configured: Vec<ConfiguredDevice>,

    #[serde(default)]
    pub importable: Vec<ImportableDevice>,
}
