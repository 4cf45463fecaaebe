//! Match coordinator error types.
//!
//! No error in this crate is fatal to the process. The worst outcome is that
//! no match forms, which is always recoverable by cancelling and retrying.
//! Internal details are logged but never surfaced to the presentation layer,
//! which only ever observes [`crate::events::LobbyEvent`]s.

use crate::transport::TransportError;
use thiserror::Error;

/// Match coordinator error type.
///
/// Maps to status codes reported to peers:
/// - `ParticipantNotFound`: `NOT_FOUND` (4)
/// - `PermissionDenied`: `FORBIDDEN` (3)
/// - `Conflict`, `RoleConflict`: `CONFLICT` (5)
/// - `ConnectionFailure`, `StaleCallback`, `Configuration`, `Internal`: `INTERNAL_ERROR` (6)
/// - `RoomFull`: `CAPACITY_EXCEEDED` (7)
#[derive(Debug, Error)]
pub enum MatchError {
    /// A configuration value was out of range and had to be corrected.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Discovery was requested while this peer already hosts or is connected.
    #[error("Role conflict: {0}")]
    RoleConflict(String),

    /// Joining a discovered host failed.
    #[error("Connection failure: {0}")]
    ConnectionFailure(#[from] TransportError),

    /// A timer or connection result arrived after the operation that
    /// scheduled it was cancelled.
    #[error("Stale callback from {source_name} (generation {generation})")]
    StaleCallback {
        source_name: &'static str,
        generation: u64,
    },

    /// Participant is not in the room.
    #[error("Participant not found: {0}")]
    ParticipantNotFound(String),

    /// A participant tried to change state it does not own.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Room is at its connection cap.
    #[error("Room at capacity: {0}")]
    RoomFull(usize),

    /// Conflict error (e.g., participant already exists).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal error (actor channel closed, response dropped).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MatchError {
    /// Returns the status code reported to peers for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            MatchError::Configuration(_)
            | MatchError::ConnectionFailure(_)
            | MatchError::StaleCallback { .. }
            | MatchError::Internal(_) => 6, // INTERNAL_ERROR
            MatchError::PermissionDenied(_) => 3, // FORBIDDEN
            MatchError::ParticipantNotFound(_) => 4, // NOT_FOUND
            MatchError::Conflict(_) | MatchError::RoleConflict(_) => 5, // CONFLICT
            MatchError::RoomFull(_) => 7, // CAPACITY_EXCEEDED
        }
    }

    /// Returns a peer-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            MatchError::Configuration(_)
            | MatchError::StaleCallback { .. }
            | MatchError::Internal(_) => "An internal error occurred".to_string(),
            MatchError::ConnectionFailure(_) => "Could not reach the host".to_string(),
            MatchError::RoleConflict(_) => "Already hosting or connected".to_string(),
            MatchError::ParticipantNotFound(_) => "Participant not found".to_string(),
            MatchError::RoomFull(_) => "Match is full".to_string(),
            MatchError::Conflict(msg) | MatchError::PermissionDenied(msg) => msg.clone(),
        }
    }
}
