//! `RoomActor` - host-side actor that owns the ready registry.
//!
//! Each `RoomActor`:
//! - Owns the registry of connected participants and their ready flags
//! - Re-evaluates the quorum after every input and publishes `QueueStatus`
//! - Runs at most one countdown at a time and decides the match start
//!
//! # Countdown callbacks
//!
//! Countdown callbacks arrive on a dedicated channel tagged with the
//! generation of the countdown that produced them. Only the running
//! generation is acted upon; anything else is a stale callback. The run
//! loop drains the mailbox before the countdown channel, so a commit is
//! always checked against every participant event already delivered.

use crate::errors::MatchError;
use crate::events::{EventBus, EventReceiver, LobbyEvent, SubscriptionId};
use crate::observability::metrics;
use crate::quorum::{QuorumPolicy, QuorumStatus};
use crate::registry::ReadyRegistry;

use super::countdown::{Countdown, CountdownSignal, CountdownState};
use super::messages::{RoomMessage, RoomPhase, RoomState};
use super::metrics::{ActorType, MailboxMonitor};

use common::types::ParticipantId;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 256;

/// Room settings.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub policy: QuorumPolicy,
    pub match_start_delay: Duration,
    /// Connection cap. Zero means uncapped.
    pub max_connections: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            policy: QuorumPolicy::new(2, false),
            match_start_delay: Duration::from_secs(3),
            max_connections: 16,
        }
    }
}

/// Handle to a `RoomActor`.
#[derive(Clone, Debug)]
pub struct RoomHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: String,
}

impl RoomHandle {
    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Register a participant that just connected.
    ///
    /// Connecting an id that is already present leaves its ready flag as is.
    pub async fn participant_connected(
        &self,
        participant_id: ParticipantId,
    ) -> Result<(), MatchError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::ParticipantConnected {
                participant_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| MatchError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| MatchError::Internal(format!("response receive failed: {e}")))?
    }

    /// Notify of a dropped connection.
    pub async fn participant_disconnected(
        &self,
        participant_id: ParticipantId,
    ) -> Result<(), MatchError> {
        self.sender
            .send(RoomMessage::ParticipantDisconnected { participant_id })
            .await
            .map_err(|e| MatchError::Internal(format!("channel send failed: {e}")))
    }

    /// Change a ready flag on behalf of `requested_by`.
    ///
    /// Only the owning participant may change its own flag.
    pub async fn set_ready(
        &self,
        requested_by: ParticipantId,
        participant_id: ParticipantId,
        ready: bool,
    ) -> Result<(), MatchError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::ReadyChanged {
                requested_by,
                participant_id,
                ready,
                respond_to: tx,
            })
            .await
            .map_err(|e| MatchError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| MatchError::Internal(format!("response receive failed: {e}")))?
    }

    /// Force a quorum re-evaluation.
    pub async fn reevaluate(&self) -> Result<(), MatchError> {
        self.sender
            .send(RoomMessage::Reevaluate)
            .await
            .map_err(|e| MatchError::Internal(format!("channel send failed: {e}")))
    }

    pub async fn subscribe(&self) -> Result<(SubscriptionId, EventReceiver), MatchError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::Subscribe { respond_to: tx })
            .await
            .map_err(|e| MatchError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| MatchError::Internal(format!("response receive failed: {e}")))
    }

    pub async fn unsubscribe(&self, subscription_id: SubscriptionId) -> Result<(), MatchError> {
        self.sender
            .send(RoomMessage::Unsubscribe { subscription_id })
            .await
            .map_err(|e| MatchError::Internal(format!("channel send failed: {e}")))
    }

    pub async fn get_state(&self) -> Result<RoomState, MatchError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::GetState { respond_to: tx })
            .await
            .map_err(|e| MatchError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| MatchError::Internal(format!("response receive failed: {e}")))
    }

    /// Stop the room. Any running countdown is cancelled.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

struct ActiveCountdown {
    generation: u64,
    countdown: Countdown,
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    room_id: String,
    config: RoomConfig,
    receiver: mpsc::Receiver<RoomMessage>,
    cancel_token: CancellationToken,
    registry: ReadyRegistry,
    bus: EventBus,
    phase: RoomPhase,
    countdown: Option<ActiveCountdown>,
    /// Generation of the most recently started countdown.
    countdown_generation: u64,
    countdown_tx: mpsc::UnboundedSender<(u64, CountdownSignal)>,
    countdown_rx: mpsc::UnboundedReceiver<(u64, CountdownSignal)>,
    /// Reset when the room empties.
    match_ready_emitted: bool,
    created_at: i64,
    mailbox: MailboxMonitor,
}

impl RoomActor {
    /// Spawn a new room actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        room_id: impl Into<String>,
        config: RoomConfig,
        cancel_token: CancellationToken,
    ) -> (RoomHandle, JoinHandle<()>) {
        let (actor, handle) = Self::new(room_id.into(), config, cancel_token);
        let task_handle = tokio::spawn(actor.run());
        (handle, task_handle)
    }

    fn new(
        room_id: String,
        config: RoomConfig,
        cancel_token: CancellationToken,
    ) -> (Self, RoomHandle) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);
        let (countdown_tx, countdown_rx) = mpsc::unbounded_channel();

        let actor = Self {
            room_id: room_id.clone(),
            config,
            receiver,
            cancel_token: cancel_token.clone(),
            registry: ReadyRegistry::new(),
            bus: EventBus::new(),
            phase: RoomPhase::Empty,
            countdown: None,
            countdown_generation: 0,
            countdown_tx,
            countdown_rx,
            match_ready_emitted: false,
            created_at: chrono::Utc::now().timestamp(),
            mailbox: MailboxMonitor::new(ActorType::Room, &room_id),
        };

        let handle = RoomHandle {
            sender,
            cancel_token,
            room_id,
        };

        (actor, handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "qm.actor.room", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        info!(
            target: "qm.room",
            room_id = %self.room_id,
            required = self.config.policy.required_count(),
            require_all = self.config.policy.require_all(),
            "RoomActor started"
        );

        loop {
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    info!(target: "qm.room", room_id = %self.room_id, "RoomActor received cancellation signal");
                    break;
                }

                msg = self.receiver.recv() => {
                    if let Some(message) = msg {
                        self.mailbox.observe(self.receiver.len());
                        self.handle_message(message);
                    } else {
                        info!(target: "qm.room", room_id = %self.room_id, "RoomActor channel closed, exiting");
                        break;
                    }
                }

                Some((generation, signal)) = self.countdown_rx.recv() => {
                    self.handle_countdown_signal(generation, signal);
                }
            }
        }

        self.shutdown();

        info!(
            target: "qm.room",
            room_id = %self.room_id,
            participants = self.registry.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::ParticipantConnected {
                participant_id,
                respond_to,
            } => {
                let result = self.handle_connected(participant_id);
                let _ = respond_to.send(result);
            }

            RoomMessage::ParticipantDisconnected { participant_id } => {
                self.handle_disconnected(participant_id);
            }

            RoomMessage::ReadyChanged {
                requested_by,
                participant_id,
                ready,
                respond_to,
            } => {
                let result = self.handle_ready_changed(requested_by, participant_id, ready);
                let _ = respond_to.send(result);
            }

            RoomMessage::Reevaluate => self.reevaluate(),

            RoomMessage::Subscribe { respond_to } => {
                let _ = respond_to.send(self.bus.subscribe());
            }

            RoomMessage::Unsubscribe { subscription_id } => {
                if !self.bus.unsubscribe(subscription_id) {
                    debug!(target: "qm.room", subscription = %subscription_id, "Unsubscribe for unknown subscription");
                }
            }

            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.state());
            }
        }
    }

    fn handle_connected(&mut self, participant_id: ParticipantId) -> Result<(), MatchError> {
        let cap = self.config.max_connections;
        if cap > 0 && self.registry.get(participant_id).is_none() && self.registry.len() >= cap {
            warn!(
                target: "qm.room",
                room_id = %self.room_id,
                participant_id = %participant_id,
                max_connections = cap,
                "Rejecting participant, room at capacity"
            );
            return Err(MatchError::RoomFull(cap));
        }

        if self.registry.upsert_participant(participant_id) {
            info!(
                target: "qm.room",
                room_id = %self.room_id,
                participant_id = %participant_id,
                total = self.registry.len(),
                "Participant connected"
            );
        } else {
            debug!(target: "qm.room", participant_id = %participant_id, "Participant already connected");
        }
        metrics::set_participants_connected(self.registry.len());

        self.reevaluate();
        Ok(())
    }

    fn handle_disconnected(&mut self, participant_id: ParticipantId) {
        if self.registry.remove_participant(participant_id).is_some() {
            info!(
                target: "qm.room",
                room_id = %self.room_id,
                participant_id = %participant_id,
                total = self.registry.len(),
                "Participant disconnected"
            );
            metrics::set_participants_connected(self.registry.len());
        } else {
            debug!(target: "qm.room", participant_id = %participant_id, "Disconnect for unknown participant");
        }

        self.reevaluate();
    }

    fn handle_ready_changed(
        &mut self,
        requested_by: ParticipantId,
        participant_id: ParticipantId,
        ready: bool,
    ) -> Result<(), MatchError> {
        if requested_by != participant_id {
            warn!(
                target: "qm.room",
                requested_by = %requested_by,
                participant_id = %participant_id,
                "Rejected ready change for another participant"
            );
            return Err(MatchError::PermissionDenied(
                "Participants may only change their own ready state".to_string(),
            ));
        }

        let changed = self.registry.set_ready(participant_id, ready)?;
        if changed {
            debug!(target: "qm.room", participant_id = %participant_id, ready, "Ready state changed");
            self.bus.publish(&LobbyEvent::ReadyStateChanged {
                participant_id,
                ready,
            });
        }

        self.reevaluate();
        Ok(())
    }

    /// Snapshot, evaluate, publish, then start or cancel the countdown.
    fn reevaluate(&mut self) {
        let outcome = self.config.policy.evaluate(self.registry.snapshot());

        self.bus.publish(&LobbyEvent::QueueStatus {
            ready_count: outcome.ready_count,
            required: outcome.required,
        });

        if self.registry.is_empty() {
            self.cancel_countdown("quorum_lost");
            if self.phase != RoomPhase::Empty {
                debug!(target: "qm.room", room_id = %self.room_id, "Room emptied");
            }
            self.phase = RoomPhase::Empty;
            self.match_ready_emitted = false;
            return;
        }

        if self.phase == RoomPhase::MatchStarted {
            return;
        }

        match (outcome.status, self.countdown.is_some()) {
            (QuorumStatus::Enough, false) => self.start_countdown(),
            (QuorumStatus::Enough, true) | (_, false) => {}
            (_, true) => self.cancel_countdown("quorum_lost"),
        }

        self.phase = if self.countdown.is_some() {
            RoomPhase::Quorate
        } else {
            RoomPhase::Forming
        };
    }

    fn start_countdown(&mut self) {
        self.countdown_generation += 1;
        let generation = self.countdown_generation;
        let tx = self.countdown_tx.clone();

        let countdown = Countdown::start(
            self.config.match_start_delay,
            move |signal: CountdownSignal| {
                // Receiver lives as long as the actor
                let _ = tx.send((generation, signal));
            },
        );

        self.countdown = Some(ActiveCountdown {
            generation,
            countdown,
        });
        metrics::record_countdown_started();

        info!(
            target: "qm.room",
            room_id = %self.room_id,
            generation,
            delay_ms = u64::try_from(self.config.match_start_delay.as_millis()).unwrap_or(u64::MAX),
            "Quorum reached, countdown started"
        );
    }

    /// Cancel the running countdown, if any, and tell observers right away.
    fn cancel_countdown(&mut self, reason: &'static str) {
        if let Some(active) = self.countdown.take() {
            active.countdown.cancel();
            self.bus.publish(&LobbyEvent::CountdownCancelled);
            metrics::record_countdown_cancelled(reason);

            info!(
                target: "qm.room",
                room_id = %self.room_id,
                generation = active.generation,
                reason,
                "Countdown cancelled"
            );
        }
    }

    fn handle_countdown_signal(&mut self, generation: u64, signal: CountdownSignal) {
        let current = self
            .countdown
            .as_ref()
            .is_some_and(|active| active.generation == generation);

        if !current {
            if signal == CountdownSignal::Cancel {
                // Acknowledgement of a cancel this actor already reported
                debug!(target: "qm.room.countdown", generation, "Countdown cancel acknowledged");
            } else {
                metrics::record_stale_callback("countdown");
                let err = MatchError::StaleCallback {
                    source_name: "countdown",
                    generation,
                };
                debug!(target: "qm.room.countdown", error = %err, ?signal, "Discarding countdown callback");
            }
            return;
        }

        match signal {
            CountdownSignal::Tick(seconds) => {
                self.bus.publish(&LobbyEvent::CountdownTick { seconds });
            }
            CountdownSignal::Commit => self.commit_countdown(),
            CountdownSignal::Cancel => {
                // Only reachable if the countdown was cancelled from outside
                warn!(target: "qm.room.countdown", generation, "Countdown cancelled externally");
                self.countdown = None;
                self.bus.publish(&LobbyEvent::CountdownCancelled);
                metrics::record_countdown_cancelled("quorum_lost");
                self.phase = RoomPhase::Forming;
            }
        }
    }

    /// The countdown reached zero. The quorum is checked one last time.
    fn commit_countdown(&mut self) {
        if let Some(active) = self.countdown.take() {
            active.countdown.cancel();
        }
        let outcome = self.config.policy.evaluate(self.registry.snapshot());

        if outcome.status != QuorumStatus::Enough {
            info!(
                target: "qm.room",
                room_id = %self.room_id,
                status = outcome.status.as_str(),
                "Quorum lost at commit, match not started"
            );
            self.bus.publish(&LobbyEvent::CountdownCancelled);
            metrics::record_countdown_cancelled("recheck_failed");
            self.phase = RoomPhase::Forming;
            return;
        }

        self.phase = RoomPhase::MatchStarted;
        if !self.match_ready_emitted {
            self.match_ready_emitted = true;
            self.bus.publish(&LobbyEvent::MatchReady);
        }
        self.bus.publish(&LobbyEvent::MatchStart);
        metrics::record_match_started();

        info!(
            target: "qm.room",
            room_id = %self.room_id,
            ready_count = outcome.ready_count,
            total = self.registry.len(),
            "Match started"
        );
    }

    fn state(&self) -> RoomState {
        let outcome = self.config.policy.evaluate(self.registry.snapshot());
        RoomState {
            room_id: self.room_id.clone(),
            phase: self.phase,
            ready_count: outcome.ready_count,
            total_connected: self.registry.len(),
            required: outcome.required,
            countdown: self
                .countdown
                .as_ref()
                .map_or(CountdownState::Idle, |active| active.countdown.state()),
            match_ready_emitted: self.match_ready_emitted,
            created_at: self.created_at,
        }
    }

    fn shutdown(&mut self) {
        self.cancel_countdown("shutdown");
        self.registry.clear();
        metrics::set_participants_connected(0);
    }
}
