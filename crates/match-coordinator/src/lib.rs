//! Quickmatch Match Coordinator Library
//!
//! Peer-to-peer quick match for a local network. Every peer runs the same
//! code and the roles sort themselves out:
//!
//! - A peer searches for a host for a bounded window and joins the first one
//!   that answers
//! - If nobody answers, the peer becomes the host and advertises itself
//! - The host runs a room that starts a countdown once enough participants are
//!   ready, and starts the match when the countdown completes with the quorum
//!   still intact
//!
//! # Architecture
//!
//! ```text
//! DiscoveryActor (one per peer)
//! ├── Network (Transport + SessionControl collaborator)
//! └── on self-promotion, the Network hosts a RoomActor
//!     ├── ReadyRegistry + QuorumPolicy
//!     └── Countdown task
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Discovery and room actors, countdown task
//! - [`config`] - Configuration from environment
//! - [`errors`] - Error types with error codes
//! - [`events`] - Presentation events and subscriptions
//! - [`observability`] - Metrics and health endpoints
//! - [`quorum`] - Ready-quorum evaluation
//! - [`registry`] - Connected participants and their ready flags
//! - [`transport`] - Network collaborator traits and the loopback LAN

pub mod actors;
pub mod config;
pub mod errors;
pub mod events;
pub mod observability;
pub mod quorum;
pub mod registry;
pub mod transport;
