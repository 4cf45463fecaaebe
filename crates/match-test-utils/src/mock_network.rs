//! Scriptable network collaborator.
//!
//! Records every call in order so tests can assert on sequencing (for
//! example that searching stopped before advertising started).
//!
//! # Example
//!
//! ```rust,ignore
//! let network = MockNetwork::new()
//!     .with_connect(ConnectBehavior::Refuse)
//!     .with_host_failure();
//!
//! assert_eq!(network.count(&NetworkCall::BroadcastDiscoveryRequest), 1);
//! ```

use common::types::ServerId;
use match_coordinator::transport::{Network, SessionControl, Transport, TransportError};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkCall {
    BroadcastDiscoveryRequest,
    StopDiscovery,
    StartAdvertising {
        server_id: ServerId,
        server_name: String,
    },
    StopAdvertising,
    StartAsHost,
    StartAsClient(SocketAddr),
    StopHost,
    StopClient,
}

/// What `start_as_client` does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehavior {
    Succeed,
    /// Fail immediately with `Unreachable`.
    Refuse,
    /// Never complete. Only the connect timeout ends the attempt.
    Hang,
    /// Succeed after the given delay.
    SucceedAfter(Duration),
}

#[derive(Debug)]
struct MockNetworkInner {
    calls: Vec<NetworkCall>,
    connect: ConnectBehavior,
    host_fails: bool,
    advertise_fails: bool,
    hosting: bool,
    client: bool,
    advertising: bool,
    host_locator: SocketAddr,
}

/// Mock network for discovery tests.
#[derive(Debug, Clone)]
pub struct MockNetwork {
    inner: Arc<Mutex<MockNetworkInner>>,
}

impl Default for MockNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNetwork {
    /// Create a mock where every operation succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockNetworkInner {
                calls: Vec::new(),
                connect: ConnectBehavior::Succeed,
                host_fails: false,
                advertise_fails: false,
                hosting: false,
                client: false,
                advertising: false,
                host_locator: "127.0.0.1:7777".parse().unwrap(),
            })),
        }
    }

    #[must_use]
    pub fn with_connect(self, behavior: ConnectBehavior) -> Self {
        self.inner.lock().unwrap().connect = behavior;
        self
    }

    /// Make `start_as_host` fail.
    #[must_use]
    pub fn with_host_failure(self) -> Self {
        self.inner.lock().unwrap().host_fails = true;
        self
    }

    /// Make `start_advertising` fail.
    #[must_use]
    pub fn with_advertise_failure(self) -> Self {
        self.inner.lock().unwrap().advertise_fails = true;
        self
    }

    /// Change connect behavior mid-test.
    pub fn set_connect(&self, behavior: ConnectBehavior) {
        self.inner.lock().unwrap().connect = behavior;
    }

    /// Pretend a session is already active, as if started outside discovery.
    pub fn set_client(&self, client: bool) {
        self.inner.lock().unwrap().client = client;
    }

    /// Upcast for `DiscoveryActor::spawn`.
    #[must_use]
    pub fn as_network(&self) -> Arc<dyn Network> {
        Arc::new(self.clone())
    }

    /// All calls so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<NetworkCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Number of calls equal to `call`.
    #[must_use]
    pub fn count(&self, call: &NetworkCall) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| *c == call)
            .count()
    }

    /// Position of the first call equal to `call`.
    #[must_use]
    pub fn position(&self, call: &NetworkCall) -> Option<usize> {
        self.inner.lock().unwrap().calls.iter().position(|c| c == call)
    }

    /// Position of the last call equal to `call`.
    #[must_use]
    pub fn last_position(&self, call: &NetworkCall) -> Option<usize> {
        self.inner.lock().unwrap().calls.iter().rposition(|c| c == call)
    }

    #[must_use]
    pub fn is_advertising(&self) -> bool {
        self.inner.lock().unwrap().advertising
    }

    #[must_use]
    pub fn is_hosting(&self) -> bool {
        self.inner.lock().unwrap().hosting
    }

    #[must_use]
    pub fn is_joined(&self) -> bool {
        self.inner.lock().unwrap().client
    }

    fn record(&self, call: NetworkCall) {
        self.inner.lock().unwrap().calls.push(call);
    }
}

#[async_trait::async_trait]
impl Transport for MockNetwork {
    async fn broadcast_discovery_request(&self) -> Result<(), TransportError> {
        self.record(NetworkCall::BroadcastDiscoveryRequest);
        Ok(())
    }

    async fn stop_discovery(&self) {
        self.record(NetworkCall::StopDiscovery);
    }

    async fn start_advertising(
        &self,
        server_id: ServerId,
        server_name: &str,
    ) -> Result<(), TransportError> {
        self.record(NetworkCall::StartAdvertising {
            server_id,
            server_name: server_name.to_string(),
        });
        let mut inner = self.inner.lock().unwrap();
        if inner.advertise_fails {
            return Err(TransportError::Closed);
        }
        if !inner.hosting {
            return Err(TransportError::NotHosting);
        }
        inner.advertising = true;
        Ok(())
    }

    async fn stop_advertising(&self) {
        self.record(NetworkCall::StopAdvertising);
        self.inner.lock().unwrap().advertising = false;
    }
}

#[async_trait::async_trait]
impl SessionControl for MockNetwork {
    async fn start_as_host(&self) -> Result<SocketAddr, TransportError> {
        self.record(NetworkCall::StartAsHost);
        let mut inner = self.inner.lock().unwrap();
        if inner.host_fails {
            return Err(TransportError::AlreadyActive("port in use".to_string()));
        }
        inner.hosting = true;
        Ok(inner.host_locator)
    }

    async fn start_as_client(&self, locator: SocketAddr) -> Result<(), TransportError> {
        self.record(NetworkCall::StartAsClient(locator));
        let behavior = self.inner.lock().unwrap().connect;
        match behavior {
            ConnectBehavior::Succeed => {}
            ConnectBehavior::Refuse => return Err(TransportError::Unreachable(locator)),
            ConnectBehavior::Hang => std::future::pending::<()>().await,
            ConnectBehavior::SucceedAfter(delay) => tokio::time::sleep(delay).await,
        }
        self.inner.lock().unwrap().client = true;
        Ok(())
    }

    async fn stop_host(&self) {
        self.record(NetworkCall::StopHost);
        self.inner.lock().unwrap().hosting = false;
    }

    async fn stop_client(&self) {
        self.record(NetworkCall::StopClient);
        self.inner.lock().unwrap().client = false;
    }

    async fn is_host(&self) -> bool {
        self.inner.lock().unwrap().hosting
    }

    async fn is_client(&self) -> bool {
        self.inner.lock().unwrap().client
    }

    async fn is_connected(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.hosting || inner.client
    }
}
