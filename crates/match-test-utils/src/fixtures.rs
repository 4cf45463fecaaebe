//! Pre-configured settings and discovery responses.

use common::protocol::DiscoveryResponse;
use common::types::ServerId;
use match_coordinator::actors::{DiscoveryConfig, RoomConfig};
use match_coordinator::quorum::QuorumPolicy;
use std::net::SocketAddr;
use std::time::Duration;

/// Discovery settings with the given window and a 100ms re-broadcast.
#[must_use]
pub fn discovery_config(window_ms: u64) -> DiscoveryConfig {
    DiscoveryConfig {
        discovery_window: Duration::from_millis(window_ms),
        discovery_interval: Duration::from_millis(100),
        connect_timeout: Duration::from_secs(1),
        ..DiscoveryConfig::default()
    }
}

/// Room settings with a whole-second countdown.
#[must_use]
pub fn room_config(required: usize, require_all: bool, delay_seconds: u64) -> RoomConfig {
    RoomConfig {
        policy: QuorumPolicy::new(required, require_all),
        match_start_delay: Duration::from_secs(delay_seconds),
        max_connections: 16,
    }
}

/// A response from a host on the LAN.
#[must_use]
pub fn host_response(server_id: u64, locator: &str) -> DiscoveryResponse {
    let locator: SocketAddr = locator.parse().unwrap();
    DiscoveryResponse {
        server_id: ServerId::from_raw(server_id),
        locator,
        server_name: format!("Host {server_id}"),
    }
}
