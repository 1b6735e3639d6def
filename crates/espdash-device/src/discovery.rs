//! mDNS resolution of a device's native API port

use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceEvent};
use tokio::time::timeout;
use tracing::{debug, trace};

/// Service type ESPHome devices advertise under
pub const SERVICE_TYPE: &str = "_esphomelib._tcp.local.";

/// Native API port used when discovery fails
pub const DEFAULT_PORT: u16 = 6053;

/// Overall budget for a discovery attempt; bounds entity startup latency
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Resolve the native API port a device advertises over mDNS.
///
/// Returns `None` on timeout, on a daemon error, or when the browse channel
/// closes without resolving the device. Callers fall back to
/// [`DEFAULT_PORT`].
pub async fn discover_port(name: &str) -> Option<u16> {
    let daemon = match ServiceDaemon::new() {
        Ok(daemon) => daemon,
        Err(err) => {
            debug!(name, %err, "mDNS daemon unavailable");
            return None;
        }
    };

    let port = match timeout(DISCOVERY_TIMEOUT, browse_for(&daemon, name)).await {
        Ok(port) => port,
        Err(_) => {
            debug!(name, "mDNS discovery timed out");
            None
        }
    };

    let _ = daemon.shutdown();
    port
}

async fn browse_for(daemon: &ServiceDaemon, name: &str) -> Option<u16> {
    let receiver = match daemon.browse(SERVICE_TYPE) {
        Ok(receiver) => receiver,
        Err(err) => {
            debug!(name, %err, "mDNS browse failed");
            return None;
        }
    };

    // Instances advertise as `<name>.<service type>`.
    let wanted = format!("{}.{}", name.to_lowercase(), SERVICE_TYPE);

    while let Ok(event) = receiver.recv_async().await {
        match event {
            ServiceEvent::ServiceResolved(info) => {
                trace!(fullname = info.get_fullname(), "mDNS service resolved");
                if info.get_fullname().to_lowercase() == wanted {
                    debug!(name, port = info.get_port(), "resolved native API port");
                    return Some(info.get_port());
                }
            }
            ServiceEvent::SearchStopped(_) => return None,
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(DEFAULT_PORT, 6053);
        assert_eq!(DISCOVERY_TIMEOUT, Duration::from_secs(3));
        assert!(SERVICE_TYPE.ends_with("._tcp.local."));
    }
}
