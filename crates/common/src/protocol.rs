//! Logical messages exchanged between peers.
//!
//! The framing and encryption of these messages belong to the transport.
//! This module only fixes their shape so every transport agrees on field
//! names; [`encode`] and [`decode`] provide a JSON rendering for transports
//! that do not bring their own codec.

use crate::error::Result;
use crate::types::{HostDescriptor, ParticipantId, ServerId};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

/// Broadcast by a searching peer. Carries no payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryRequest;

/// Sent by a host in reply to a [`DiscoveryRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    pub server_id: ServerId,
    pub locator: SocketAddr,
    pub server_name: String,
}

impl DiscoveryResponse {
    /// Replace the advertised IP with the address the response arrived from.
    ///
    /// Hosts bound to a wildcard address advertise `0.0.0.0`; the source
    /// address of the datagram is the only one the searcher can reach.
    #[must_use]
    pub fn with_source_addr(mut self, source: IpAddr) -> Self {
        self.locator.set_ip(source);
        self
    }

    /// View as a host descriptor.
    #[must_use]
    pub fn host(&self) -> HostDescriptor {
        HostDescriptor {
            locator: self.locator,
            server_name: self.server_name.clone(),
            server_id: self.server_id,
        }
    }
}

/// Client asks the host to change its own ready flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyToggleRequest {
    pub participant_id: ParticipantId,
    pub ready: bool,
}

/// Host tells everyone a ready flag changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyStateChanged {
    pub participant_id: ParticipantId,
    pub ready: bool,
}

/// Envelope for every peer-to-peer message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMessage {
    DiscoveryRequest,
    DiscoveryResponse(DiscoveryResponse),
    ReadyToggleRequest(ReadyToggleRequest),
    ReadyStateChanged(ReadyStateChanged),
    CountdownTick { seconds: u32 },
    CountdownCancelled,
}

/// Encode a message as JSON bytes.
///
/// # Errors
///
/// Returns `QuickmatchError::Serialization` if serde fails.
pub fn encode(message: &PeerMessage) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

/// Decode a message from JSON bytes.
///
/// # Errors
///
/// Returns `QuickmatchError::Serialization` for malformed input.
pub fn decode(bytes: &[u8]) -> Result<PeerMessage> {
    Ok(serde_json::from_slice(bytes)?)
}
