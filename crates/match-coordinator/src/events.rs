//! Presentation events and their fan-out.
//!
//! Each coordinator owns an [`EventBus`]. Observers subscribe to a specific
//! coordinator instance and receive every event in the order it was
//! published. Delivery never blocks the coordinator and never coalesces: a
//! `QueueStatus` pulse that is immediately superseded is still delivered.

use common::types::{HostDescriptor, ParticipantId, ServerId};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::trace;

/// Status event consumed by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LobbyEvent {
    /// Discovery began broadcasting.
    SearchStarted,
    /// A host answered and a join attempt is in flight.
    Connecting { host: HostDescriptor },
    /// The join attempt succeeded.
    Joined { host: HostDescriptor },
    /// No host answered in time and this peer now hosts.
    HostingStarted {
        server_id: ServerId,
        locator: SocketAddr,
    },
    /// Matchmaking was stopped and every partial effect undone.
    Cancelled,
    /// Published after every quorum evaluation, even if nothing changed.
    QueueStatus { ready_count: usize, required: usize },
    /// A participant's ready flag changed.
    ReadyStateChanged {
        participant_id: ParticipantId,
        ready: bool,
    },
    CountdownTick { seconds: u32 },
    CountdownCancelled,
    /// Quorum held at commit. Emitted at most once per forming room.
    MatchReady,
    /// Authoritative start. The collaborator layer switches scenes on this.
    MatchStart,
}

/// Identifies one subscription on one bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Receiving end handed to an observer.
pub type EventReceiver = mpsc::UnboundedReceiver<LobbyEvent>;

/// Ordered, lossless fan-out to the observers of one coordinator.
#[derive(Debug, Default)]
pub struct EventBus {
    next_id: u64,
    subscribers: BTreeMap<SubscriptionId, mpsc::UnboundedSender<LobbyEvent>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new observer.
    pub fn subscribe(&mut self) -> (SubscriptionId, EventReceiver) {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.insert(id, tx);
        (id, rx)
    }

    /// Remove an observer. Returns false if it was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    /// Deliver `event` to every observer. Observers whose receiver was
    /// dropped are removed.
    pub fn publish(&mut self, event: &LobbyEvent) {
        self.subscribers.retain(|id, tx| {
            let delivered = tx.send(event.clone()).is_ok();
            if !delivered {
                trace!(target: "qm.events", subscription = %id, "Dropping closed subscriber");
            }
            delivered
        });
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_events_delivered_in_publish_order() {
        let mut bus = EventBus::new();
        let (_id, mut rx) = bus.subscribe();

        bus.publish(&LobbyEvent::QueueStatus {
            ready_count: 1,
            required: 2,
        });
        bus.publish(&LobbyEvent::QueueStatus {
            ready_count: 0,
            required: 2,
        });
        bus.publish(&LobbyEvent::CountdownCancelled);

        assert_eq!(
            rx.try_recv().unwrap(),
            LobbyEvent::QueueStatus {
                ready_count: 1,
                required: 2
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            LobbyEvent::QueueStatus {
                ready_count: 0,
                required: 2
            }
        );
        assert_eq!(rx.try_recv().unwrap(), LobbyEvent::CountdownCancelled);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let mut bus = EventBus::new();
        let (first, mut first_rx) = bus.subscribe();
        let (_second, mut second_rx) = bus.subscribe();

        assert!(bus.unsubscribe(first));
        assert!(!bus.unsubscribe(first));

        bus.publish(&LobbyEvent::MatchStart);

        // Sender dropped on unsubscribe, so the receiver reports closed
        assert!(first_rx.try_recv().is_err());
        assert_eq!(second_rx.try_recv().unwrap(), LobbyEvent::MatchStart);
    }

    #[test]
    fn test_dropped_receivers_are_pruned() {
        let mut bus = EventBus::new();
        let (_id, rx) = bus.subscribe();
        let (_kept, _kept_rx) = bus.subscribe();
        drop(rx);

        bus.publish(&LobbyEvent::SearchStarted);

        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_event_wire_shape() {
        let json = serde_json::to_value(LobbyEvent::CountdownTick { seconds: 2 }).unwrap();
        assert_eq!(json["event"], "countdown_tick");
        assert_eq!(json["seconds"], 2);
    }
}
