//! # Match Test Utilities
//!
//! Shared test utilities for the match coordinator.
//!
//! - `mock_network` - Scriptable [`Network`](match_coordinator::transport::Network)
//!   that records every call
//! - `recorder` - Collects `LobbyEvent`s from a subscription
//! - `fixtures` - Pre-configured settings and discovery responses
//!
//! ## Usage
//!
//! ```rust,ignore
//! use match_test_utils::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() {
//!     let network = MockNetwork::new().with_connect(ConnectBehavior::Hang);
//!     let (discovery, _task) = DiscoveryActor::spawn(
//!         fixtures::discovery_config(3_000),
//!         ServerId::from_raw(1),
//!         network.as_network(),
//!         CancellationToken::new(),
//!     );
//!     let mut events = EventRecorder::new(discovery.subscribe().await.unwrap().1);
//!     // ...
//! }
//! ```

pub mod fixtures;
pub mod mock_network;
pub mod recorder;

pub use mock_network::{ConnectBehavior, MockNetwork, NetworkCall};
pub use recorder::EventRecorder;
