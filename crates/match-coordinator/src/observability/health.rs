//! Health endpoints for the match coordinator.
//!
//! - `GET /health` - Liveness probe (is the process running?)
//! - `GET /ready` - Readiness probe (has this peer resolved a role?)
//! - `GET /status` - JSON view of the peer's current role
//!
//! The `/metrics` endpoint is served separately via `metrics-exporter-prometheus`.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Role this peer currently plays, as reported by `/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRole {
    Idle,
    Searching,
    Client,
    Host,
}

impl PeerRole {
    const fn to_u8(self) -> u8 {
        match self {
            PeerRole::Idle => 0,
            PeerRole::Searching => 1,
            PeerRole::Client => 2,
            PeerRole::Host => 3,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            1 => PeerRole::Searching,
            2 => PeerRole::Client,
            3 => PeerRole::Host,
            _ => PeerRole::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
struct StatusBody {
    live: bool,
    ready: bool,
    role: PeerRole,
}

/// Liveness, readiness and role of this peer.
///
/// Ready means the peer is either hosting or joined to a host.
#[derive(Debug)]
pub struct HealthState {
    live: AtomicBool,
    role: AtomicU8,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (live, idle, not ready).
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            role: AtomicU8::new(PeerRole::Idle.to_u8()),
        }
    }

    pub fn set_role(&self, role: PeerRole) {
        self.role.store(role.to_u8(), Ordering::SeqCst);
    }

    /// Mark the process as shutting down.
    pub fn set_not_live(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn role(&self) -> PeerRole {
        PeerRole::from_u8(self.role.load(Ordering::SeqCst))
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self.role(), PeerRole::Client | PeerRole::Host)
    }
}

/// Create the health router.
///
/// `/ready` returns 503 until discovery has resolved a role.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .route("/status", get(status_handler))
        .with_state(health_state)
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn status_handler(State(state): State<Arc<HealthState>>) -> Json<StatusBody> {
    Json(StatusBody {
        live: state.is_live(),
        ready: state.is_ready(),
        role: state.role(),
    })
}
