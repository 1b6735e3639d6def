//! Storage and device registry
//!
//! Persistence follows the `.storage/` directory pattern: one JSON file per
//! key, wrapped in a version envelope. The device registry tracks physical
//! devices with typed connections so update entities can attach to a device
//! that another integration already registered (matched by MAC address).

mod device_registry;
mod storage;

pub use device_registry::{
    format_mac, DeviceConnection, DeviceEntry, DeviceFields, DeviceIdentifier, DeviceRegistry,
    CONNECTION_NETWORK_MAC,
};
pub use storage::{Storable, Storage, StorageError, StorageFile, StorageResult};
