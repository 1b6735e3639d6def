//! Dashboard config entries
//!
//! A [`DashboardEntry`] represents one configured dashboard connection. The
//! [`ConfigEntries`] manager owns the set of entries, enforces one entry per
//! dashboard URL and persists them through storage.

mod entry;
mod manager;

pub use entry::{Credentials, DashboardConfig, DashboardEntry, EntrySource, EntryState};
pub use manager::{ConfigEntries, ConfigEntriesError, ConfigEntriesResult, STORAGE_KEY};
