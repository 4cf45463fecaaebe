//! Actor model implementation for the match coordinator.
//!
//! ```text
//! DiscoveryActor (one per peer)
//! └── drives the Network collaborator: search, join, or self-host
//!
//! RoomActor (one per hosted room, only on the host)
//! ├── owns the ReadyRegistry
//! └── supervises at most one Countdown task
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single writer**: Registry and quorum state are only touched from the room task
//! - **Generation counters**: Countdown signals and join results carry the generation
//!   that started them; anything older is discarded
//! - **CancellationToken propagation**: Rooms get child tokens of the peer's token
//! - **Mailbox monitoring**: Depth thresholds with metrics (Room: 32/128, Discovery: 16/64)
//!
//! # Modules
//!
//! - [`countdown`] - Cancellable per-second countdown task
//! - [`discovery`] - `DiscoveryActor`, host search with self-promotion
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring
//! - [`room`] - `RoomActor`, ready quorum and match start

pub mod countdown;
pub mod discovery;
pub mod messages;
pub mod metrics;
pub mod room;

// Re-export primary types
pub use countdown::{Countdown, CountdownObserver, CountdownSignal, CountdownState};
pub use discovery::{
    DiscoveryActor, DiscoveryConfig, DiscoveryHandle, RetryDeadline, SplitBrainPolicy,
};
pub use messages::*;
pub use metrics::{ActorType, MailboxLevel, MailboxMonitor};
pub use room::{RoomActor, RoomConfig, RoomHandle};
