//! Message types for actor communication.
//!
//! Every request to an actor goes through its `tokio::sync::mpsc` mailbox.
//! Requests that need an answer carry a `tokio::sync::oneshot` sender.

use crate::actors::countdown::CountdownState;
use crate::errors::MatchError;
use crate::events::{EventReceiver, SubscriptionId};
use common::protocol::DiscoveryResponse;
use common::types::{HostDescriptor, ParticipantId, ServerId};
use serde::Serialize;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::oneshot;

/// Messages sent to `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// A participant connected to the host.
    ParticipantConnected {
        participant_id: ParticipantId,
        respond_to: oneshot::Sender<Result<(), MatchError>>,
    },

    /// A participant's connection dropped.
    ParticipantDisconnected { participant_id: ParticipantId },

    /// A participant asks to change a ready flag.
    ReadyChanged {
        /// Participant that sent the request.
        requested_by: ParticipantId,
        /// Participant whose flag should change.
        participant_id: ParticipantId,
        ready: bool,
        respond_to: oneshot::Sender<Result<(), MatchError>>,
    },

    /// Re-run the quorum evaluation without any registry change.
    Reevaluate,

    Subscribe {
        respond_to: oneshot::Sender<(SubscriptionId, EventReceiver)>,
    },

    Unsubscribe { subscription_id: SubscriptionId },

    GetState {
        respond_to: oneshot::Sender<RoomState>,
    },
}

/// Room lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomPhase {
    /// Nobody connected.
    Empty,
    /// Participants connected but quorum not met.
    Forming,
    /// Quorum met and a countdown is running.
    Quorate,
    /// The countdown committed. No further countdowns until the room empties.
    MatchStarted,
}

impl RoomPhase {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            RoomPhase::Empty => "empty",
            RoomPhase::Forming => "forming",
            RoomPhase::Quorate => "quorate",
            RoomPhase::MatchStarted => "match_started",
        }
    }
}

/// Room state snapshot.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room_id: String,
    pub phase: RoomPhase,
    pub ready_count: usize,
    pub total_connected: usize,
    pub required: usize,
    pub countdown: CountdownState,
    pub match_ready_emitted: bool,
    /// Unix timestamp the room was created.
    pub created_at: i64,
}

/// Messages sent to `DiscoveryActor`.
#[derive(Debug)]
pub enum DiscoveryMessage {
    /// Start searching for a host.
    BeginMatchmaking {
        respond_to: oneshot::Sender<Result<(), MatchError>>,
    },

    /// Stop whatever matchmaking is in progress and undo its effects.
    CancelMatchmaking { respond_to: oneshot::Sender<()> },

    /// A host answered a discovery request (or announced itself).
    DiscoveryResponse { response: DiscoveryResponse },

    /// The connection to the joined host went away.
    ClientDisconnected,

    Subscribe {
        respond_to: oneshot::Sender<(SubscriptionId, EventReceiver)>,
    },

    Unsubscribe { subscription_id: SubscriptionId },

    GetState {
        respond_to: oneshot::Sender<DiscoveryState>,
    },
}

/// Discovery lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryPhase {
    Idle,
    /// Broadcasting requests until the window closes.
    Searching,
    /// A join attempt is in flight.
    Connecting,
    Joined,
    /// Window closed; promotion to host in progress.
    TimedOut,
    SelfHosting,
}

impl DiscoveryPhase {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DiscoveryPhase::Idle => "idle",
            DiscoveryPhase::Searching => "searching",
            DiscoveryPhase::Connecting => "connecting",
            DiscoveryPhase::Joined => "joined",
            DiscoveryPhase::TimedOut => "timed_out",
            DiscoveryPhase::SelfHosting => "self_hosting",
        }
    }
}

/// Discovery state snapshot.
#[derive(Debug, Clone)]
pub struct DiscoveryState {
    pub phase: DiscoveryPhase,
    pub server_id: ServerId,
    pub found_host: Option<HostDescriptor>,
    /// Time left in the search window, while searching.
    pub search_remaining: Option<Duration>,
    /// Locator this peer hosts on, while self-hosting.
    pub hosted_locator: Option<SocketAddr>,
}
