//! Network collaborators of the coordinators.
//!
//! Packet framing, encryption and the broadcast socket itself live behind
//! these traits. The discovery coordinator only ever talks to a
//! [`Network`], which is anything implementing both [`Transport`] and
//! [`SessionControl`].
//!
//! Discovery responses flow the other way: the transport hands each one to
//! [`crate::actors::DiscoveryHandle::discovery_response`].

pub mod loopback;

use common::types::ServerId;
use std::net::SocketAddr;
use thiserror::Error;

/// Failures reported by a transport implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Nothing is listening at the address.
    #[error("No host reachable at {0}")]
    Unreachable(SocketAddr),

    /// The host refused the connection.
    #[error("Connection rejected: {0}")]
    Rejected(String),

    /// A connection attempt did not complete in time.
    #[error("Connection attempt timed out")]
    Timeout,

    /// A host-only operation was called while not hosting.
    #[error("Not hosting")]
    NotHosting,

    /// The role is already taken (hosting or connected).
    #[error("Session already active: {0}")]
    AlreadyActive(String),

    /// The underlying socket or peer went away.
    #[error("Transport closed")]
    Closed,
}

/// Broadcast side of the transport: discovery requests and host advertising.
///
/// The searching and advertising modes share one channel. Callers must stop
/// one fully before starting the other.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Send one discovery request to the local network.
    async fn broadcast_discovery_request(&self) -> Result<(), TransportError>;

    /// Stop searching. No further discovery requests go out after this returns.
    async fn stop_discovery(&self);

    /// Start answering discovery requests as `server_id` with `server_name`.
    async fn start_advertising(
        &self,
        server_id: ServerId,
        server_name: &str,
    ) -> Result<(), TransportError>;

    /// Stop answering discovery requests.
    async fn stop_advertising(&self);
}

/// Session role primitives.
#[async_trait::async_trait]
pub trait SessionControl: Send + Sync {
    /// Start listening for match connections. Returns the bound locator.
    async fn start_as_host(&self) -> Result<SocketAddr, TransportError>;

    /// Join the host at `locator`.
    async fn start_as_client(&self, locator: SocketAddr) -> Result<(), TransportError>;

    /// Stop hosting and drop every connected participant.
    async fn stop_host(&self);

    /// Leave the current host, or abandon a join in progress.
    async fn stop_client(&self);

    async fn is_host(&self) -> bool;

    async fn is_client(&self) -> bool;

    /// True when hosting or joined.
    async fn is_connected(&self) -> bool;
}

/// Everything the discovery coordinator needs from the network.
pub trait Network: Transport + SessionControl {}

impl<T: Transport + SessionControl + ?Sized> Network for T {}
