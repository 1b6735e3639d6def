//! ESPHome Dashboard update integration
//!
//! Polls an ESPHome Dashboard for its configured devices, exposes one update
//! entity per device and drives the remote compile + OTA-upload workflow.
//! Firmware versions are resolved from three ranked sources: a live device
//! feed when one exists, a cached direct device query, and finally the
//! version the dashboard last saw deployed.

pub mod config_flow;
pub mod coordinator;
pub mod live;
pub mod platform;
pub mod resolver;
pub mod setup;
pub mod update;

pub use config_flow::{ConfigFlow, FlowResult, UserInput};
pub use coordinator::{DashboardCoordinator, DeviceMap, ListenerId, RefreshError};
pub use live::{LiveVersionFeed, SubscriptionId};
pub use platform::UpdatePlatform;
pub use resolver::{first_version, VersionState};
pub use setup::{setup_entry, setup_entry_with, unload_entry, RuntimeData, SetupError};
pub use update::{InstallError, NativeVersionQuery, UpdateEntity, VersionQuery};

/// Integration domain, used for device identifiers
pub const DOMAIN: &str = "esphome_dashboard";
