//! Mailbox monitoring for the coordinator actors.
//!
//! | Actor Type | Normal | Warning | Critical |
//! |------------|--------|---------|----------|
//! | Room       | < 32   | 32-128  | > 128    |
//! | Discovery  | < 16   | 16-64   | > 64     |
//!
//! A match group is a handful of peers, so a deep mailbox means an actor is
//! stuck rather than busy.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Mailbox depth thresholds for room actors.
pub const ROOM_MAILBOX_NORMAL: usize = 32;
pub const ROOM_MAILBOX_WARNING: usize = 128;

/// Mailbox depth thresholds for discovery actors.
pub const DISCOVERY_MAILBOX_NORMAL: usize = 16;
pub const DISCOVERY_MAILBOX_WARNING: usize = 64;

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// `RoomActor` (one per hosting peer).
    Room,
    /// `DiscoveryActor` (one per process).
    Discovery,
}

impl ActorType {
    /// Returns the actor type as a string for metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Room => "room",
            ActorType::Discovery => "discovery",
        }
    }

    #[must_use]
    pub const fn warning_threshold(&self) -> usize {
        match self {
            ActorType::Room => ROOM_MAILBOX_WARNING,
            ActorType::Discovery => DISCOVERY_MAILBOX_WARNING,
        }
    }

    #[must_use]
    pub const fn normal_threshold(&self) -> usize {
        match self {
            ActorType::Room => ROOM_MAILBOX_NORMAL,
            ActorType::Discovery => DISCOVERY_MAILBOX_NORMAL,
        }
    }
}

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

/// Tracks mailbox depth as observed by the owning actor.
///
/// The actor calls [`MailboxMonitor::observe`] with the number of messages
/// still queued each time it takes one off the mailbox.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    actor_id: String,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// Record one message taken off the mailbox with `queued` still waiting.
    pub fn observe(&self, queued: usize) {
        let previous = self.depth.swap(queued, Ordering::Relaxed);
        self.peak_depth.fetch_max(queued, Ordering::Relaxed);
        self.messages_processed.fetch_add(1, Ordering::Relaxed);

        match self.level_for_depth(queued) {
            MailboxLevel::Critical => {
                warn!(
                    target: "qm.actor.mailbox",
                    actor_type = self.actor_type.as_str(),
                    actor_id = %self.actor_id,
                    depth = queued,
                    threshold = self.actor_type.warning_threshold(),
                    "Mailbox depth critical"
                );
            }
            MailboxLevel::Warning if previous <= self.actor_type.normal_threshold() => {
                // Log once when crossing into the warning band
                debug!(
                    target: "qm.actor.mailbox",
                    actor_type = self.actor_type.as_str(),
                    actor_id = %self.actor_id,
                    depth = queued,
                    "Mailbox depth elevated"
                );
            }
            _ => {}
        }
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        self.level_for_depth(self.current_depth())
    }

    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth > self.actor_type.warning_threshold() {
            MailboxLevel::Critical
        } else if depth > self.actor_type.normal_threshold() {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}
