//! Common data types for Quickmatch components.

use crate::error::QuickmatchError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use uuid::Uuid;

/// Unique identifier for a participant connection.
///
/// A reconnecting peer gets a fresh id; ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub Uuid);

impl ParticipantId {
    /// Create a new random participant ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier a peer advertises when hosting.
///
/// Generated once per process lifetime. Always nonzero and within the
/// positive 63-bit range so it survives signed encodings unchanged.
///
/// Decoding checks the range instead of masking, so a peer announcing an
/// out-of-range id is rejected rather than silently renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct ServerId(u64);

impl ServerId {
    /// Largest value a server id can take (63 bits).
    pub const MAX: u64 = i64::MAX as u64;

    /// Generate a random nonzero 63-bit server id.
    #[must_use]
    pub fn generate() -> Self {
        Self::from_raw(rand::random::<u64>())
    }

    /// Build a server id from raw bits, masking to 63 bits and mapping zero to one.
    #[must_use]
    pub fn from_raw(raw: u64) -> Self {
        match raw & Self::MAX {
            0 => Self(1),
            value => Self(value),
        }
    }

    /// Raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for ServerId {
    type Error = QuickmatchError;

    fn try_from(raw: u64) -> Result<Self, Self::Error> {
        if raw == 0 || raw > Self::MAX {
            return Err(QuickmatchError::InvalidServerId(raw));
        }
        Ok(Self(raw))
    }
}

impl From<ServerId> for u64 {
    fn from(id: ServerId) -> Self {
        id.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A host found on the local network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDescriptor {
    /// Address the host accepts match connections on.
    pub locator: SocketAddr,
    /// Display name the host advertises.
    pub server_name: String,
    /// The host's server id.
    pub server_id: ServerId,
}
