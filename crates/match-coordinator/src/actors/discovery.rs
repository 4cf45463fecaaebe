//! `DiscoveryActor` - finds a host on the local network or becomes one.
//!
//! ```text
//! Idle -> Searching -> Connecting -> Joined
//!             |  ^          |
//!             |  +----------+  (join failed: resume search)
//!             v
//!         TimedOut -> SelfHosting
//! ```
//!
//! One actor per process, identified by a `ServerId` generated once. A
//! response carrying that id is this peer hearing itself and is ignored.
//!
//! Join attempts run on their own task and are tagged with an attempt
//! generation. Cancelling bumps the generation, so a result that arrives
//! afterwards is recognised as stale and discarded.

use crate::errors::MatchError;
use crate::events::{EventBus, EventReceiver, LobbyEvent, SubscriptionId};
use crate::observability::metrics;
use crate::transport::{Network, TransportError};

use super::messages::{DiscoveryMessage, DiscoveryPhase, DiscoveryState};
use super::metrics::{ActorType, MailboxMonitor};

use common::protocol::DiscoveryResponse;
use common::types::{HostDescriptor, ServerId};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

/// Default channel buffer size for the discovery mailbox.
const DISCOVERY_CHANNEL_BUFFER: usize = 64;

/// What a failed join does to the search deadline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryDeadline {
    /// The original window keeps running.
    #[default]
    Original,
    /// A failed join grants a fresh full window.
    Restart,
}

impl FromStr for RetryDeadline {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "original" => Ok(RetryDeadline::Original),
            "restart" => Ok(RetryDeadline::Restart),
            other => Err(format!("unknown retry deadline mode: {other}")),
        }
    }
}

/// How a self-hosting peer reacts to hearing another host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SplitBrainPolicy {
    /// Keep hosting. Two hosts may coexist.
    #[default]
    Ignore,
    /// The host with the lower server id tears down and joins the other.
    HighestServerIdWins,
}

impl FromStr for SplitBrainPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ignore" => Ok(SplitBrainPolicy::Ignore),
            "highest-server-id" | "highest_server_id" => Ok(SplitBrainPolicy::HighestServerIdWins),
            other => Err(format!("unknown split brain policy: {other}")),
        }
    }
}

/// Discovery settings.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// How long to search before self-promotion.
    pub discovery_window: Duration,
    /// Re-broadcast interval while searching. Must be nonzero.
    pub discovery_interval: Duration,
    /// Bound on a single join attempt.
    pub connect_timeout: Duration,
    pub retry_deadline: RetryDeadline,
    pub split_brain_policy: SplitBrainPolicy,
    pub advertised_server_name: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            discovery_window: Duration::from_secs(3),
            discovery_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
            retry_deadline: RetryDeadline::Original,
            split_brain_policy: SplitBrainPolicy::Ignore,
            advertised_server_name: "Quickmatch".to_string(),
        }
    }
}

/// Handle to a `DiscoveryActor`.
#[derive(Clone)]
pub struct DiscoveryHandle {
    sender: mpsc::Sender<DiscoveryMessage>,
    cancel_token: CancellationToken,
    server_id: ServerId,
}

impl fmt::Debug for DiscoveryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryHandle")
            .field("server_id", &self.server_id)
            .finish_non_exhaustive()
    }
}

impl DiscoveryHandle {
    #[must_use]
    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    /// Start searching for a host.
    ///
    /// A no-op while already searching or connecting. Fails with
    /// `RoleConflict` if this peer already hosts or is joined.
    pub async fn begin_matchmaking(&self) -> Result<(), MatchError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DiscoveryMessage::BeginMatchmaking { respond_to: tx })
            .await
            .map_err(|e| MatchError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| MatchError::Internal(format!("response receive failed: {e}")))?
    }

    /// Stop matchmaking from any state. Safe to call repeatedly.
    pub async fn cancel_matchmaking(&self) -> Result<(), MatchError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DiscoveryMessage::CancelMatchmaking { respond_to: tx })
            .await
            .map_err(|e| MatchError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| MatchError::Internal(format!("response receive failed: {e}")))
    }

    /// Deliver a discovery response received by the transport.
    pub async fn discovery_response(&self, response: DiscoveryResponse) -> Result<(), MatchError> {
        self.sender
            .send(DiscoveryMessage::DiscoveryResponse { response })
            .await
            .map_err(|e| MatchError::Internal(format!("channel send failed: {e}")))
    }

    /// Report that the connection to the joined host dropped.
    pub async fn client_disconnected(&self) -> Result<(), MatchError> {
        self.sender
            .send(DiscoveryMessage::ClientDisconnected)
            .await
            .map_err(|e| MatchError::Internal(format!("channel send failed: {e}")))
    }

    pub async fn subscribe(&self) -> Result<(SubscriptionId, EventReceiver), MatchError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DiscoveryMessage::Subscribe { respond_to: tx })
            .await
            .map_err(|e| MatchError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| MatchError::Internal(format!("response receive failed: {e}")))
    }

    pub async fn unsubscribe(&self, subscription_id: SubscriptionId) -> Result<(), MatchError> {
        self.sender
            .send(DiscoveryMessage::Unsubscribe { subscription_id })
            .await
            .map_err(|e| MatchError::Internal(format!("channel send failed: {e}")))
    }

    pub async fn get_state(&self) -> Result<DiscoveryState, MatchError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DiscoveryMessage::GetState { respond_to: tx })
            .await
            .map_err(|e| MatchError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| MatchError::Internal(format!("response receive failed: {e}")))
    }

    /// Stop the actor. Matchmaking is cancelled first.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Result of one join attempt, sent back from the attempt task.
#[derive(Debug)]
struct AttemptResult {
    generation: u64,
    host: HostDescriptor,
    result: Result<(), TransportError>,
    elapsed: Duration,
}

/// The `DiscoveryActor` implementation.
pub struct DiscoveryActor {
    server_id: ServerId,
    config: DiscoveryConfig,
    network: Arc<dyn Network>,
    receiver: mpsc::Receiver<DiscoveryMessage>,
    cancel_token: CancellationToken,
    bus: EventBus,
    phase: DiscoveryPhase,
    search_deadline: Option<Instant>,
    found_host: Option<HostDescriptor>,
    hosted_locator: Option<SocketAddr>,
    /// Bumped on every new attempt and on cancel.
    attempt_generation: u64,
    attempt_task: Option<JoinHandle<()>>,
    attempt_tx: mpsc::UnboundedSender<AttemptResult>,
    attempt_rx: mpsc::UnboundedReceiver<AttemptResult>,
    rebroadcast: Interval,
    mailbox: MailboxMonitor,
}

impl DiscoveryActor {
    /// Spawn a new discovery actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        config: DiscoveryConfig,
        server_id: ServerId,
        network: Arc<dyn Network>,
        cancel_token: CancellationToken,
    ) -> (DiscoveryHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(DISCOVERY_CHANNEL_BUFFER);
        let (attempt_tx, attempt_rx) = mpsc::unbounded_channel();

        let mut rebroadcast = tokio::time::interval(config.discovery_interval.max(Duration::from_millis(1)));
        rebroadcast.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let actor = Self {
            server_id,
            config,
            network,
            receiver,
            cancel_token: cancel_token.clone(),
            bus: EventBus::new(),
            phase: DiscoveryPhase::Idle,
            search_deadline: None,
            found_host: None,
            hosted_locator: None,
            attempt_generation: 0,
            attempt_task: None,
            attempt_tx,
            attempt_rx,
            rebroadcast,
            mailbox: MailboxMonitor::new(ActorType::Discovery, server_id.to_string()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = DiscoveryHandle {
            sender,
            cancel_token,
            server_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "qm.actor.discovery", fields(server_id = %self.server_id))]
    async fn run(mut self) {
        info!(target: "qm.discovery", server_id = %self.server_id, "DiscoveryActor started");

        loop {
            let searching = self.phase == DiscoveryPhase::Searching;
            let deadline = self.search_deadline.filter(|_| searching);

            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    info!(target: "qm.discovery", "DiscoveryActor received cancellation signal");
                    break;
                }

                msg = self.receiver.recv() => {
                    if let Some(message) = msg {
                        self.mailbox.observe(self.receiver.len());
                        self.handle_message(message).await;
                    } else {
                        info!(target: "qm.discovery", "DiscoveryActor channel closed, exiting");
                        break;
                    }
                }

                Some(result) = self.attempt_rx.recv() => {
                    self.handle_attempt_result(result).await;
                }

                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_search_deadline().await;
                }

                _ = self.rebroadcast.tick(), if searching => {
                    self.broadcast().await;
                }
            }
        }

        self.cancel().await;

        info!(
            target: "qm.discovery",
            server_id = %self.server_id,
            messages_processed = self.mailbox.messages_processed(),
            "DiscoveryActor stopped"
        );
    }

    async fn handle_message(&mut self, message: DiscoveryMessage) {
        match message {
            DiscoveryMessage::BeginMatchmaking { respond_to } => {
                let result = self.begin().await;
                let _ = respond_to.send(result);
            }

            DiscoveryMessage::CancelMatchmaking { respond_to } => {
                self.cancel().await;
                let _ = respond_to.send(());
            }

            DiscoveryMessage::DiscoveryResponse { response } => {
                self.on_discovery_response(response).await;
            }

            DiscoveryMessage::ClientDisconnected => {
                if self.phase == DiscoveryPhase::Joined {
                    info!(target: "qm.discovery", "Lost connection to host");
                    self.cancel().await;
                } else {
                    debug!(
                        target: "qm.discovery",
                        phase = self.phase.as_str(),
                        "Ignoring client disconnect outside of joined state"
                    );
                }
            }

            DiscoveryMessage::Subscribe { respond_to } => {
                let _ = respond_to.send(self.bus.subscribe());
            }

            DiscoveryMessage::Unsubscribe { subscription_id } => {
                self.bus.unsubscribe(subscription_id);
            }

            DiscoveryMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.state());
            }
        }
    }

    async fn begin(&mut self) -> Result<(), MatchError> {
        match self.phase {
            DiscoveryPhase::Searching | DiscoveryPhase::Connecting => {
                debug!(target: "qm.discovery", phase = self.phase.as_str(), "Matchmaking already in progress");
                return Ok(());
            }
            DiscoveryPhase::Joined | DiscoveryPhase::SelfHosting | DiscoveryPhase::TimedOut => {
                let err = MatchError::RoleConflict(format!("already {}", self.phase.as_str()));
                warn!(target: "qm.discovery", error = %err, "Ignoring begin matchmaking");
                return Err(err);
            }
            DiscoveryPhase::Idle => {}
        }

        if self.network.is_connected().await {
            let err = MatchError::RoleConflict("session already active".to_string());
            warn!(target: "qm.discovery", error = %err, "Ignoring begin matchmaking");
            return Err(err);
        }

        self.attempt_generation += 1;
        self.found_host = None;
        self.search_deadline = Some(Instant::now() + self.config.discovery_window);
        self.start_searching().await;

        info!(
            target: "qm.discovery",
            window_ms = u64::try_from(self.config.discovery_window.as_millis()).unwrap_or(u64::MAX),
            "Searching for a host"
        );
        Ok(())
    }

    /// Enter `Searching`, broadcast once and restart the re-broadcast timer.
    async fn start_searching(&mut self) {
        self.phase = DiscoveryPhase::Searching;
        self.bus.publish(&LobbyEvent::SearchStarted);
        self.broadcast().await;
        self.rebroadcast.reset();
    }

    async fn broadcast(&self) {
        trace!(target: "qm.discovery", "Broadcasting discovery request");
        if let Err(e) = self.network.broadcast_discovery_request().await {
            // Not fatal: the deadline still promotes this peer to host.
            warn!(target: "qm.discovery", error = %e, "Discovery broadcast failed");
        }
    }

    async fn on_discovery_response(&mut self, response: DiscoveryResponse) {
        if response.server_id == self.server_id {
            trace!(target: "qm.discovery", "Ignoring own discovery response");
            return;
        }

        match self.phase {
            DiscoveryPhase::Searching => self.connect_to(response.host()).await,
            DiscoveryPhase::SelfHosting
                if self.config.split_brain_policy == SplitBrainPolicy::HighestServerIdWins
                    && response.server_id > self.server_id =>
            {
                self.yield_to_host(response.host()).await;
            }
            phase => {
                debug!(
                    target: "qm.discovery",
                    phase = phase.as_str(),
                    other_server_id = %response.server_id,
                    "Ignoring discovery response"
                );
            }
        }
    }

    /// Stop searching and start a join attempt on its own task.
    async fn connect_to(&mut self, host: HostDescriptor) {
        self.network.stop_discovery().await;

        self.attempt_generation += 1;
        let generation = self.attempt_generation;
        self.phase = DiscoveryPhase::Connecting;
        self.found_host = Some(host.clone());
        self.bus.publish(&LobbyEvent::Connecting { host: host.clone() });

        info!(
            target: "qm.discovery",
            host = %host.locator,
            host_server_id = %host.server_id,
            generation,
            "Host found, connecting"
        );

        let network = Arc::clone(&self.network);
        let tx = self.attempt_tx.clone();
        let timeout = self.config.connect_timeout;
        self.attempt_task = Some(tokio::spawn(async move {
            let started = Instant::now();
            let result = match tokio::time::timeout(timeout, network.start_as_client(host.locator)).await
            {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout),
            };
            let _ = tx.send(AttemptResult {
                generation,
                host,
                result,
                elapsed: started.elapsed(),
            });
        }));
    }

    async fn handle_attempt_result(&mut self, attempt: AttemptResult) {
        let status = if attempt.result.is_ok() { "success" } else { "error" };
        metrics::record_join_attempt(status, attempt.elapsed);

        if attempt.generation != self.attempt_generation || self.phase != DiscoveryPhase::Connecting {
            metrics::record_stale_callback("connect");
            let err = MatchError::StaleCallback {
                source_name: "connect",
                generation: attempt.generation,
            };
            debug!(target: "qm.discovery", error = %err, "Discarding join result");

            // A late success must not leave a connection behind, unless a
            // newer attempt now owns the client slot.
            if attempt.result.is_ok()
                && !matches!(self.phase, DiscoveryPhase::Connecting | DiscoveryPhase::Joined)
            {
                self.network.stop_client().await;
            }
            return;
        }

        self.attempt_task = None;

        match attempt.result {
            Ok(()) => {
                self.phase = DiscoveryPhase::Joined;
                self.search_deadline = None;
                self.bus.publish(&LobbyEvent::Joined {
                    host: attempt.host.clone(),
                });
                metrics::record_discovery_outcome("joined");
                info!(
                    target: "qm.discovery",
                    host = %attempt.host.locator,
                    "Joined host"
                );
            }
            Err(e) => {
                let err = MatchError::ConnectionFailure(e);
                warn!(
                    target: "qm.discovery",
                    error = %err,
                    host = %attempt.host.locator,
                    "Join attempt failed, resuming search"
                );
                metrics::record_discovery_outcome("connect_failed");

                self.network.stop_client().await;
                self.found_host = None;
                if self.config.retry_deadline == RetryDeadline::Restart
                    || self.search_deadline.is_none()
                {
                    self.search_deadline = Some(Instant::now() + self.config.discovery_window);
                }
                self.start_searching().await;
            }
        }
    }

    /// The search window closed without a join: become the host.
    async fn on_search_deadline(&mut self) {
        self.phase = DiscoveryPhase::TimedOut;
        self.search_deadline = None;
        self.found_host = None;
        info!(target: "qm.discovery", "No host found, promoting to host");

        // Searching and advertising share the channel
        self.network.stop_discovery().await;

        let locator = match self.network.start_as_host().await {
            Ok(locator) => locator,
            Err(e) => {
                error!(target: "qm.discovery", error = %e, "Failed to start hosting");
                self.abandon_hosting().await;
                return;
            }
        };

        if let Err(e) = self
            .network
            .start_advertising(self.server_id, &self.config.advertised_server_name)
            .await
        {
            error!(target: "qm.discovery", error = %e, "Failed to start advertising");
            self.network.stop_host().await;
            self.abandon_hosting().await;
            return;
        }

        self.phase = DiscoveryPhase::SelfHosting;
        self.hosted_locator = Some(locator);
        self.bus.publish(&LobbyEvent::HostingStarted {
            server_id: self.server_id,
            locator,
        });
        metrics::record_discovery_outcome("self_hosted");
        info!(
            target: "qm.discovery",
            locator = %locator,
            server_name = %self.config.advertised_server_name,
            "Hosting and advertising"
        );
    }

    async fn abandon_hosting(&mut self) {
        self.phase = DiscoveryPhase::Idle;
        self.hosted_locator = None;
        self.bus.publish(&LobbyEvent::Cancelled);
        metrics::record_discovery_outcome("host_failed");
    }

    /// Another host with a higher server id exists: stop hosting and join it.
    async fn yield_to_host(&mut self, host: HostDescriptor) {
        info!(
            target: "qm.discovery",
            other_server_id = %host.server_id,
            "Another host outranks this one, yielding"
        );

        self.network.stop_advertising().await;
        self.network.stop_host().await;
        self.hosted_locator = None;
        self.search_deadline = Some(Instant::now() + self.config.discovery_window);
        self.connect_to(host).await;
    }

    /// Undo whatever the current phase has set up and return to `Idle`.
    async fn cancel(&mut self) {
        self.attempt_generation += 1;
        if let Some(task) = self.attempt_task.take() {
            task.abort();
        }

        match self.phase {
            DiscoveryPhase::Idle => {
                trace!(target: "qm.discovery", "Cancel while idle");
                return;
            }
            DiscoveryPhase::Searching => self.network.stop_discovery().await,
            DiscoveryPhase::Connecting | DiscoveryPhase::Joined => {
                self.network.stop_client().await;
            }
            DiscoveryPhase::TimedOut | DiscoveryPhase::SelfHosting => {
                self.network.stop_advertising().await;
                self.network.stop_host().await;
            }
        }

        info!(target: "qm.discovery", phase = self.phase.as_str(), "Matchmaking cancelled");

        self.phase = DiscoveryPhase::Idle;
        self.search_deadline = None;
        self.found_host = None;
        self.hosted_locator = None;
        self.bus.publish(&LobbyEvent::Cancelled);
        metrics::record_discovery_outcome("cancelled");
    }

    fn state(&self) -> DiscoveryState {
        let now = Instant::now();
        DiscoveryState {
            phase: self.phase,
            server_id: self.server_id,
            found_host: self.found_host.clone(),
            search_remaining: self
                .search_deadline
                .filter(|_| self.phase == DiscoveryPhase::Searching)
                .map(|deadline| deadline.saturating_duration_since(now)),
            hosted_locator: self.hosted_locator,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Minimal in-module network double. The richer scriptable mock lives in
    /// the test-utils crate and is used by the integration tests.
    #[derive(Default)]
    struct StubNetwork {
        calls: Mutex<Vec<&'static str>>,
        refuse_connect: bool,
    }

    impl StubNetwork {
        fn record(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, call: &str) -> usize {
            self.calls().iter().filter(|c| **c == call).count()
        }
    }

    #[async_trait::async_trait]
    impl crate::transport::Transport for StubNetwork {
        async fn broadcast_discovery_request(&self) -> Result<(), TransportError> {
            self.record("broadcast");
            Ok(())
        }
        async fn stop_discovery(&self) {
            self.record("stop_discovery");
        }
        async fn start_advertising(
            &self,
            _server_id: ServerId,
            _server_name: &str,
        ) -> Result<(), TransportError> {
            self.record("start_advertising");
            Ok(())
        }
        async fn stop_advertising(&self) {
            self.record("stop_advertising");
        }
    }

    #[async_trait::async_trait]
    impl crate::transport::SessionControl for StubNetwork {
        async fn start_as_host(&self) -> Result<SocketAddr, TransportError> {
            self.record("start_as_host");
            Ok("127.0.0.1:7777".parse().unwrap())
        }
        async fn start_as_client(&self, locator: SocketAddr) -> Result<(), TransportError> {
            self.record("start_as_client");
            if self.refuse_connect {
                Err(TransportError::Unreachable(locator))
            } else {
                Ok(())
            }
        }
        async fn stop_host(&self) {
            self.record("stop_host");
        }
        async fn stop_client(&self) {
            self.record("stop_client");
        }
        async fn is_host(&self) -> bool {
            false
        }
        async fn is_client(&self) -> bool {
            false
        }
        async fn is_connected(&self) -> bool {
            false
        }
    }

    fn config() -> DiscoveryConfig {
        DiscoveryConfig {
            discovery_window: Duration::from_secs(3),
            ..DiscoveryConfig::default()
        }
    }

    fn spawn(network: Arc<StubNetwork>) -> (DiscoveryHandle, JoinHandle<()>) {
        DiscoveryActor::spawn(
            config(),
            ServerId::from_raw(100),
            network,
            CancellationToken::new(),
        )
    }

    fn response(server_id: u64) -> DiscoveryResponse {
        DiscoveryResponse {
            server_id: ServerId::from_raw(server_id),
            locator: "192.168.1.20:7777".parse().unwrap(),
            server_name: "Other".to_string(),
        }
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("restart".parse::<RetryDeadline>(), Ok(RetryDeadline::Restart));
        assert_eq!("ORIGINAL".parse::<RetryDeadline>(), Ok(RetryDeadline::Original));
        assert!("later".parse::<RetryDeadline>().is_err());
        assert_eq!(
            "highest-server-id".parse::<SplitBrainPolicy>(),
            Ok(SplitBrainPolicy::HighestServerIdWins)
        );
        assert!("vote".parse::<SplitBrainPolicy>().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_elapses_into_self_hosting() {
        let network = Arc::new(StubNetwork::default());
        let (handle, _task) = spawn(Arc::clone(&network));

        handle.begin_matchmaking().await.unwrap();
        tokio::time::sleep(Duration::from_millis(3100)).await;

        let state = handle.get_state().await.unwrap();
        assert_eq!(state.phase, DiscoveryPhase::SelfHosting);
        assert_eq!(network.count("start_advertising"), 1);

        // Searching stopped before advertising started
        let calls = network.calls();
        let stop = calls.iter().rposition(|c| *c == "stop_discovery").unwrap();
        let advertise = calls.iter().position(|c| *c == "start_advertising").unwrap();
        assert!(stop < advertise);

        // No further search once hosting
        let broadcasts = network.count("broadcast");
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(network.count("broadcast"), broadcasts);
    }

    #[tokio::test(start_paused = true)]
    async fn test_own_response_is_ignored() {
        let network = Arc::new(StubNetwork::default());
        let (handle, _task) = spawn(Arc::clone(&network));

        handle.begin_matchmaking().await.unwrap();
        handle.discovery_response(response(100)).await.unwrap();

        let state = handle.get_state().await.unwrap();
        assert_eq!(state.phase, DiscoveryPhase::Searching);
        assert_eq!(network.count("start_as_client"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_begin_twice_is_noop() {
        let network = Arc::new(StubNetwork::default());
        let (handle, _task) = spawn(Arc::clone(&network));

        handle.begin_matchmaking().await.unwrap();
        handle.begin_matchmaking().await.unwrap();

        assert_eq!(network.count("broadcast"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_twice_resets_once() {
        let network = Arc::new(StubNetwork::default());
        let (handle, _task) = spawn(Arc::clone(&network));
        let (_id, mut events) = handle.subscribe().await.unwrap();

        handle.begin_matchmaking().await.unwrap();
        handle.cancel_matchmaking().await.unwrap();
        handle.cancel_matchmaking().await.unwrap();
        handle.get_state().await.unwrap();

        let received: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert_eq!(received, vec![LobbyEvent::SearchStarted, LobbyEvent::Cancelled]);
        assert_eq!(network.count("stop_discovery"), 1);

        // The deadline of the cancelled session never fires
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(network.count("start_as_host"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_join_resumes_search() {
        let network = Arc::new(StubNetwork {
            refuse_connect: true,
            ..StubNetwork::default()
        });
        let (handle, _task) = spawn(Arc::clone(&network));

        handle.begin_matchmaking().await.unwrap();
        handle.discovery_response(response(7)).await.unwrap();
        // Let the attempt task report back
        tokio::time::sleep(Duration::from_millis(10)).await;

        let state = handle.get_state().await.unwrap();
        assert_eq!(state.phase, DiscoveryPhase::Searching);
        assert!(state.found_host.is_none());
        assert_eq!(network.count("broadcast"), 2);
    }
}
