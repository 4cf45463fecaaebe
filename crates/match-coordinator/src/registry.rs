//! Ready registry: who is connected to the host and who is ready.
//!
//! Disconnected participants are removed, never flagged, so the number of
//! connected participants is always the size of the map. The registry does
//! not evaluate the quorum itself; the room actor does that after every
//! mutation.

use crate::errors::MatchError;
use common::types::ParticipantId;
use std::collections::HashMap;

/// A participant as the host sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub ready: bool,
}

/// Point-in-time counts used by the quorum policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub ready_count: usize,
    pub total_connected: usize,
}

#[derive(Debug, Default)]
pub struct ReadyRegistry {
    participants: HashMap<ParticipantId, Participant>,
}

impl ReadyRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a participant as not ready. Returns false if it was already
    /// present, in which case its ready flag is left untouched.
    pub fn upsert_participant(&mut self, id: ParticipantId) -> bool {
        let mut inserted = false;
        self.participants.entry(id).or_insert_with(|| {
            inserted = true;
            Participant { id, ready: false }
        });
        inserted
    }

    /// Remove a participant. Returns the removed entry, if any.
    pub fn remove_participant(&mut self, id: ParticipantId) -> Option<Participant> {
        self.participants.remove(&id)
    }

    /// Set a participant's ready flag. Returns whether the flag changed.
    ///
    /// # Errors
    ///
    /// Returns `MatchError::ParticipantNotFound` if `id` is not connected.
    pub fn set_ready(&mut self, id: ParticipantId, ready: bool) -> Result<bool, MatchError> {
        let participant = self
            .participants
            .get_mut(&id)
            .ok_or_else(|| MatchError::ParticipantNotFound(id.to_string()))?;

        let changed = participant.ready != ready;
        participant.ready = ready;
        Ok(changed)
    }

    #[must_use]
    pub fn get(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.get(&id)
    }

    #[must_use]
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            ready_count: self.participants.values().filter(|p| p.ready).count(),
            total_connected: self.participants.len(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn clear(&mut self) {
        self.participants.clear();
    }
}
