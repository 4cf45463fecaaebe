//! Quorum policy.
//!
//! A single pure decision on whether the room may start: only
//! [`QuorumStatus::Enough`] lets a countdown start or keep running.

use crate::registry::RegistrySnapshot;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuorumStatus {
    NotEnough,
    Enough,
    /// The ready count reached the threshold but unanimity is required.
    EnoughButNotAll,
}

impl QuorumStatus {
    /// Returns the status as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            QuorumStatus::NotEnough => "not_enough",
            QuorumStatus::Enough => "enough",
            QuorumStatus::EnoughButNotAll => "enough_but_not_all",
        }
    }
}

/// Result of one evaluation, including the target shown to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumOutcome {
    pub status: QuorumStatus,
    pub ready_count: usize,
    /// Ready count the room is waiting for.
    pub required: usize,
}

/// Evaluate the quorum for the given counts.
#[must_use]
pub fn evaluate(
    ready_count: usize,
    total_connected: usize,
    required_count: usize,
    require_all: bool,
) -> QuorumStatus {
    if total_connected == 0 {
        return QuorumStatus::NotEnough;
    }

    let enough_ready = ready_count >= required_count;
    let everyone_ready = ready_count == total_connected;

    if !enough_ready {
        QuorumStatus::NotEnough
    } else if require_all && !everyone_ready {
        QuorumStatus::EnoughButNotAll
    } else {
        QuorumStatus::Enough
    }
}

/// Configured quorum rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumPolicy {
    required_count: usize,
    require_all: bool,
}

impl QuorumPolicy {
    /// Create a policy. A zero `required_count` is raised to one.
    #[must_use]
    pub fn new(required_count: usize, require_all: bool) -> Self {
        Self {
            required_count: required_count.max(1),
            require_all,
        }
    }

    #[must_use]
    pub fn required_count(&self) -> usize {
        self.required_count
    }

    #[must_use]
    pub fn require_all(&self) -> bool {
        self.require_all
    }

    /// Evaluate a registry snapshot.
    ///
    /// An empty room reports the configured count as its target so the
    /// displayed goal stays stable. With unanimity required the target grows
    /// with the room.
    #[must_use]
    pub fn evaluate(&self, snapshot: RegistrySnapshot) -> QuorumOutcome {
        let status = evaluate(
            snapshot.ready_count,
            snapshot.total_connected,
            self.required_count,
            self.require_all,
        );

        let required = if snapshot.total_connected > 0 && self.require_all {
            snapshot.total_connected.max(self.required_count)
        } else {
            self.required_count
        };

        QuorumOutcome {
            status,
            ready_count: snapshot.ready_count,
            required,
        }
    }
}
