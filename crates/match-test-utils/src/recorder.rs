//! Event collection for assertions.

use match_coordinator::events::{EventReceiver, LobbyEvent};
use std::time::Duration;

/// Buffers every event received from one subscription.
pub struct EventRecorder {
    receiver: EventReceiver,
    seen: Vec<LobbyEvent>,
}

impl EventRecorder {
    #[must_use]
    pub fn new(receiver: EventReceiver) -> Self {
        Self {
            receiver,
            seen: Vec::new(),
        }
    }

    /// Pull in everything already queued and return the full history.
    pub fn drain(&mut self) -> &[LobbyEvent] {
        while let Ok(event) = self.receiver.try_recv() {
            self.seen.push(event);
        }
        &self.seen
    }

    /// Wait until an event matching `predicate` arrives.
    ///
    /// Panics if none arrives within `limit`.
    pub async fn wait_for<F>(&mut self, limit: Duration, predicate: F) -> LobbyEvent
    where
        F: Fn(&LobbyEvent) -> bool,
    {
        let found = tokio::time::timeout(limit, async {
            while let Some(event) = self.receiver.recv().await {
                self.seen.push(event.clone());
                if predicate(&event) {
                    return Some(event);
                }
            }
            None
        })
        .await;

        match found {
            Ok(Some(event)) => event,
            Ok(None) => panic!("event stream closed; seen so far: {:?}", self.seen),
            Err(_) => panic!("no matching event within {limit:?}; seen so far: {:?}", self.seen),
        }
    }

    /// Number of recorded events matching `predicate`.
    pub fn count<F>(&mut self, predicate: F) -> usize
    where
        F: Fn(&LobbyEvent) -> bool,
    {
        self.drain().iter().filter(|e| predicate(e)).count()
    }

    /// Countdown tick values seen so far, in order.
    pub fn ticks(&mut self) -> Vec<u32> {
        self.drain()
            .iter()
            .filter_map(|e| match e {
                LobbyEvent::CountdownTick { seconds } => Some(*seconds),
                _ => None,
            })
            .collect()
    }
}
