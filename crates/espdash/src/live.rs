//! Live device version feed
//!
//! Models the sibling integration that talks to ESPHome devices directly:
//! when it knows a device, its reported firmware version is the
//! authoritative tier. Entities subscribe per device name; subscriptions are
//! explicit and unsubscribing is idempotent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::trace;

/// Identifier for a feed subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn() + Send + Sync>;

/// Per-device live version source
pub struct LiveVersionFeed {
    /// Presence of a key means a live source exists for that device, even
    /// when it currently reports no version.
    versions: DashMap<String, Option<String>>,
    subscribers: DashMap<u64, (String, Callback)>,
    next_id: AtomicU64,
}

impl LiveVersionFeed {
    pub fn new() -> Self {
        Self {
            versions: DashMap::new(),
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Whether a live source exists for this device name.
    pub fn contains(&self, name: &str) -> bool {
        self.versions.contains_key(name)
    }

    /// The version the live source currently reports, if any.
    pub fn version(&self, name: &str) -> Option<String> {
        self.versions.get(name).and_then(|v| v.value().clone())
    }

    /// Producer side: publish a device's reported version.
    pub fn set_version(&self, name: &str, version: Option<String>) {
        self.versions.insert(name.to_string(), version);
        self.notify(name);
    }

    /// Producer side: the live source for a device disappeared.
    pub fn remove(&self, name: &str) {
        self.versions.remove(name);
        self.notify(name);
    }

    /// Subscribe to change notifications for one device name.
    pub fn subscribe(&self, name: &str, callback: Callback) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.insert(id, (name.to_string(), callback));
        SubscriptionId(id)
    }

    /// Remove a subscription. Safe to call with an already-removed id.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.remove(&id.0);
    }

    fn notify(&self, name: &str) {
        trace!(name, "live version feed changed");
        // Snapshot first so callbacks may subscribe or unsubscribe freely.
        let callbacks: Vec<Callback> = self
            .subscribers
            .iter()
            .filter(|entry| entry.value().0 == name)
            .map(|entry| entry.value().1.clone())
            .collect();
        for callback in callbacks {
            callback();
        }
    }
}

impl Default for LiveVersionFeed {
    fn default() -> Self {
        Self::new()
    }
}
