//! In-process LAN for running several peers in one process.
//!
//! Every [`LoopbackNode`] on a [`LoopbackLan`] sees the same broadcast
//! domain. Hosts are real [`RoomActor`]s; joining a host registers the
//! node's participant with that room directly. Deliveries are delayed by a
//! fixed latency so the races of a real network (two peers promoting at once,
//! a host vanishing mid-join) can be reproduced under paused time.

use crate::actors::{DiscoveryActor, DiscoveryConfig, DiscoveryHandle, RoomActor, RoomConfig, RoomHandle};
use crate::errors::MatchError;
use crate::events::{EventReceiver, SubscriptionId};
use crate::transport::{SessionControl, Transport, TransportError};

use common::protocol::{self, DiscoveryResponse, PeerMessage};
use common::types::{ParticipantId, ServerId};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// First port handed out to a hosting node.
const FIRST_PORT: u16 = 7770;

const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

#[derive(Default)]
struct LanState {
    next_port: u16,
    next_node: u64,
    /// Discovery actor of every attached node, keyed by node.
    peers: HashMap<u64, DiscoveryHandle>,
    /// Announcements of advertising nodes, keyed by node.
    advertisers: HashMap<u64, DiscoveryResponse>,
    hosts: HashMap<SocketAddr, RoomHandle>,
}

/// A simulated broadcast domain.
#[derive(Clone)]
pub struct LoopbackLan {
    state: Arc<Mutex<LanState>>,
    latency: Duration,
}

impl LoopbackLan {
    #[must_use]
    pub fn new(latency: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(LanState {
                next_port: FIRST_PORT,
                ..LanState::default()
            })),
            latency,
        }
    }

    /// Create a node on this LAN. Hosted rooms use `room_config`.
    pub async fn node(&self, room_config: RoomConfig, cancel_token: CancellationToken) -> Arc<LoopbackNode> {
        let node_id = {
            let mut state = self.state.lock().await;
            state.next_node += 1;
            state.next_node
        };

        Arc::new(LoopbackNode {
            node_id,
            participant_id: ParticipantId::new(),
            lan: Arc::clone(&self.state),
            latency: self.latency,
            room_config,
            cancel_token,
            searching: Arc::new(AtomicBool::new(false)),
            discovery: OnceLock::new(),
            session: Mutex::new(Session::Idle),
        })
    }

    /// Create a node and a discovery actor driving it.
    pub async fn spawn_peer(
        &self,
        server_id: ServerId,
        discovery_config: DiscoveryConfig,
        room_config: RoomConfig,
        cancel_token: CancellationToken,
    ) -> LoopbackPeer {
        let node = self.node(room_config, cancel_token.child_token()).await;
        let (discovery, task) = DiscoveryActor::spawn(
            discovery_config,
            server_id,
            Arc::clone(&node) as Arc<dyn crate::transport::Network>,
            cancel_token,
        );
        node.attach(discovery.clone()).await;

        LoopbackPeer {
            node,
            discovery,
            task,
        }
    }

    /// Number of rooms currently hosted on this LAN.
    pub async fn host_count(&self) -> usize {
        self.state.lock().await.hosts.len()
    }
}

/// A node plus the discovery actor that drives it.
pub struct LoopbackPeer {
    pub node: Arc<LoopbackNode>,
    pub discovery: DiscoveryHandle,
    pub task: JoinHandle<()>,
}

enum Session {
    Idle,
    Hosting {
        locator: SocketAddr,
        room: RoomHandle,
    },
    /// Join sent to the host but not confirmed. The host may already count
    /// this node, so leaving must still disconnect it.
    Joining {
        locator: SocketAddr,
        room: RoomHandle,
    },
    Client {
        locator: SocketAddr,
        room: RoomHandle,
        watcher: JoinHandle<()>,
    },
}

impl Session {
    fn room(&self) -> Option<&RoomHandle> {
        match self {
            Session::Idle | Session::Joining { .. } => None,
            Session::Hosting { room, .. } | Session::Client { room, .. } => Some(room),
        }
    }
}

/// One peer's view of the loopback LAN.
pub struct LoopbackNode {
    node_id: u64,
    participant_id: ParticipantId,
    lan: Arc<Mutex<LanState>>,
    latency: Duration,
    room_config: RoomConfig,
    cancel_token: CancellationToken,
    searching: Arc<AtomicBool>,
    discovery: OnceLock<DiscoveryHandle>,
    session: Mutex<Session>,
}

impl LoopbackNode {
    /// Connect this node to the discovery actor that receives its responses.
    ///
    /// Only the first call has an effect.
    pub async fn attach(&self, discovery: DiscoveryHandle) {
        if self.discovery.set(discovery.clone()).is_err() {
            warn!(target: "qm.transport.loopback", node = self.node_id, "Node already attached");
            return;
        }

        self.lan.lock().await.peers.insert(self.node_id, discovery);
    }

    #[must_use]
    pub fn participant_id(&self) -> ParticipantId {
        self.participant_id
    }

    /// Room this node hosts or has joined.
    pub async fn room(&self) -> Option<RoomHandle> {
        self.session.lock().await.room().cloned()
    }

    /// Subscribe to the events of the room this node is in.
    pub async fn room_events(&self) -> Result<(SubscriptionId, EventReceiver), MatchError> {
        let room = self
            .room()
            .await
            .ok_or_else(|| MatchError::Conflict("not in a room".to_string()))?;
        room.subscribe().await
    }

    /// Toggle this node's own ready flag in its current room.
    pub async fn set_ready(&self, ready: bool) -> Result<(), MatchError> {
        let room = self
            .room()
            .await
            .ok_or_else(|| MatchError::Conflict("not in a room".to_string()))?;
        room.set_ready(self.participant_id, self.participant_id, ready)
            .await
    }

    /// Send `response` to `target` as a datagram would travel: encoded,
    /// delayed, then decoded with the source address applied.
    fn deliver(&self, target: DiscoveryHandle, response: DiscoveryResponse, gate: Option<Arc<AtomicBool>>) {
        let datagram = match protocol::encode(&PeerMessage::DiscoveryResponse(response)) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(target: "qm.transport.loopback", error = %e, "Failed to encode discovery response");
                return;
            }
        };

        let latency = self.latency;
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            if let Some(gate) = gate {
                if !gate.load(Ordering::SeqCst) {
                    trace!(target: "qm.transport.loopback", "Dropping response to peer that stopped searching");
                    return;
                }
            }

            let response = match protocol::decode(&datagram) {
                Ok(PeerMessage::DiscoveryResponse(response)) => response.with_source_addr(LOOPBACK),
                Ok(other) => {
                    debug!(target: "qm.transport.loopback", message = ?other, "Ignoring unexpected datagram");
                    return;
                }
                Err(e) => {
                    warn!(target: "qm.transport.loopback", error = %e, "Malformed datagram");
                    return;
                }
            };

            if let Err(e) = target.discovery_response(response).await {
                debug!(target: "qm.transport.loopback", error = %e, "Response delivery failed");
            }
        });
    }
}

#[async_trait::async_trait]
impl Transport for LoopbackNode {
    async fn broadcast_discovery_request(&self) -> Result<(), TransportError> {
        let discovery = self.discovery.get().cloned().ok_or(TransportError::Closed)?;
        self.searching.store(true, Ordering::SeqCst);

        let answers: Vec<DiscoveryResponse> = self.lan.lock().await.advertisers.values().cloned().collect();
        trace!(target: "qm.transport.loopback", node = self.node_id, answers = answers.len(), "Discovery broadcast");

        for response in answers {
            self.deliver(discovery.clone(), response, Some(Arc::clone(&self.searching)));
        }
        Ok(())
    }

    async fn stop_discovery(&self) {
        self.searching.store(false, Ordering::SeqCst);
    }

    async fn start_advertising(&self, server_id: ServerId, server_name: &str) -> Result<(), TransportError> {
        let port = match &*self.session.lock().await {
            Session::Hosting { locator, .. } => locator.port(),
            _ => return Err(TransportError::NotHosting),
        };

        let announcement = DiscoveryResponse {
            server_id,
            locator: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
            server_name: server_name.to_string(),
        };

        let mut lan = self.lan.lock().await;
        // Hosts hear each other's announcements regardless of searching
        for (node_id, other) in &lan.advertisers {
            if let Some(peer) = lan.peers.get(node_id) {
                self.deliver(peer.clone(), announcement.clone(), None);
            }
            if let Some(own) = self.discovery.get() {
                self.deliver(own.clone(), other.clone(), None);
            }
        }
        lan.advertisers.insert(self.node_id, announcement);

        info!(target: "qm.transport.loopback", node = self.node_id, port, "Advertising");
        Ok(())
    }

    async fn stop_advertising(&self) {
        if self.lan.lock().await.advertisers.remove(&self.node_id).is_some() {
            debug!(target: "qm.transport.loopback", node = self.node_id, "Stopped advertising");
        }
    }
}

#[async_trait::async_trait]
impl SessionControl for LoopbackNode {
    async fn start_as_host(&self) -> Result<SocketAddr, TransportError> {
        let mut session = self.session.lock().await;
        if !matches!(*session, Session::Idle) {
            return Err(TransportError::AlreadyActive("session in progress".to_string()));
        }

        let locator = {
            let mut lan = self.lan.lock().await;
            let port = lan.next_port;
            lan.next_port = lan.next_port.wrapping_add(1);
            SocketAddr::new(LOOPBACK, port)
        };

        let (room, _task) = RoomActor::spawn(
            format!("room-{}", locator.port()),
            self.room_config.clone(),
            self.cancel_token.child_token(),
        );

        if let Err(e) = room.participant_connected(self.participant_id).await {
            room.cancel();
            return Err(TransportError::Rejected(e.to_string()));
        }

        self.lan.lock().await.hosts.insert(locator, room.clone());
        *session = Session::Hosting { locator, room };

        info!(target: "qm.transport.loopback", node = self.node_id, locator = %locator, "Hosting");
        Ok(locator)
    }

    async fn start_as_client(&self, locator: SocketAddr) -> Result<(), TransportError> {
        let mut session = self.session.lock().await;
        if !matches!(*session, Session::Idle) {
            return Err(TransportError::AlreadyActive("session in progress".to_string()));
        }

        tokio::time::sleep(self.latency).await;

        let room = self
            .lan
            .lock()
            .await
            .hosts
            .get(&locator)
            .cloned()
            .ok_or(TransportError::Unreachable(locator))?;

        let (_subscription, mut link) = room
            .subscribe()
            .await
            .map_err(|_| TransportError::Unreachable(locator))?;

        // Recorded before the connect goes out: if this future is dropped
        // while waiting for the reply, stop_client still removes us.
        *session = Session::Joining {
            locator,
            room: room.clone(),
        };
        if let Err(e) = room.participant_connected(self.participant_id).await {
            *session = Session::Idle;
            return Err(TransportError::Rejected(e.client_message()));
        }

        // The event stream ends when the host's room stops.
        let discovery = self.discovery.get().cloned();
        let node_id = self.node_id;
        let watcher = tokio::spawn(async move {
            while link.recv().await.is_some() {}
            info!(target: "qm.transport.loopback", node = node_id, "Host went away");
            if let Some(discovery) = discovery {
                let _ = discovery.client_disconnected().await;
            }
        });

        *session = Session::Client {
            locator,
            room,
            watcher,
        };
        info!(target: "qm.transport.loopback", node = self.node_id, locator = %locator, "Joined");
        Ok(())
    }

    async fn stop_host(&self) {
        let mut session = self.session.lock().await;
        if let Session::Hosting { locator, room } = &*session {
            self.lan.lock().await.hosts.remove(locator);
            room.cancel();
            info!(target: "qm.transport.loopback", node = self.node_id, locator = %locator, "Stopped hosting");
            *session = Session::Idle;
        }
    }

    async fn stop_client(&self) {
        let mut session = self.session.lock().await;
        let (locator, room) = match &*session {
            Session::Client {
                locator,
                room,
                watcher,
            } => {
                watcher.abort();
                (*locator, room.clone())
            }
            Session::Joining { locator, room } => (*locator, room.clone()),
            Session::Idle | Session::Hosting { .. } => return,
        };

        let _ = room.participant_disconnected(self.participant_id).await;
        debug!(target: "qm.transport.loopback", node = self.node_id, locator = %locator, "Left host");
        *session = Session::Idle;
    }

    async fn is_host(&self) -> bool {
        matches!(*self.session.lock().await, Session::Hosting { .. })
    }

    async fn is_client(&self) -> bool {
        matches!(*self.session.lock().await, Session::Client { .. })
    }

    async fn is_connected(&self) -> bool {
        matches!(
            *self.session.lock().await,
            Session::Hosting { .. } | Session::Client { .. }
        )
    }
}
