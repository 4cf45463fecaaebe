//! Match Coordinator
//!
//! Runs a handful of quick-match peers on an in-process loopback LAN and
//! drives them through discovery, ready-up and match start.
//!
//! # Servers
//!
//! - HTTP server for health endpoints and `/metrics` (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing (plain or JSON)
//! 3. Initialize Prometheus metrics recorder
//! 4. Start health HTTP server (liveness, readiness, status, metrics)
//! 5. Spawn the first peer and let it promote itself to host
//! 6. Spawn the remaining peers, which discover and join that host
//! 7. Every peer readies up once it has a room; the host counts down
//! 8. Wait for shutdown signal

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use common::config::ObservabilityConfig;
use common::types::ServerId;
use match_coordinator::actors::DiscoveryHandle;
use match_coordinator::config::Config;
use match_coordinator::events::LobbyEvent;
use match_coordinator::observability::{health_router, init_metrics_recorder, HealthState, PeerRole};
use match_coordinator::transport::loopback::{LoopbackLan, LoopbackNode, LoopbackPeer};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Simulated one-way latency of the loopback LAN.
const LOOPBACK_LATENCY: Duration = Duration::from_millis(5);

/// Time given to actors to unwind after the shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration first so the log format is known
    let config = Config::from_env();
    let observability = config
        .as_ref()
        .map(|c| c.observability.clone())
        .unwrap_or_default();
    init_tracing(&observability);

    info!("Starting Match Coordinator");

    let config = config.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        required_players = config.required_players,
        max_connections = config.max_connections,
        require_all_ready = config.require_all_ready,
        match_start_delay_ms = u64::try_from(config.match_start_delay.as_millis()).unwrap_or(u64::MAX),
        discovery_window_ms = u64::try_from(config.discovery_window.as_millis()).unwrap_or(u64::MAX),
        retry_deadline = ?config.retry_deadline,
        split_brain_policy = ?config.split_brain_policy,
        health_bind_address = %config.health_bind_address,
        simulated_peers = config.simulated_peers,
        "Configuration loaded successfully"
    );

    // This must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());
    let shutdown_token = CancellationToken::new();

    // Start health HTTP server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let app = health_router(Arc::clone(&health_state)).merge(metrics_router);

    // Bind listener BEFORE spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // Peers
    let lan = LoopbackLan::new(LOOPBACK_LATENCY);
    let mut peers = Vec::with_capacity(config.simulated_peers);

    for index in 0..config.simulated_peers {
        let peer = lan
            .spawn_peer(
                ServerId::generate(),
                config.discovery_config(),
                config.room_config(),
                shutdown_token.child_token(),
            )
            .await;

        let health = (index == 0).then(|| Arc::clone(&health_state));
        let (_subscription, events) = peer.discovery.subscribe().await?;
        let (resolved_tx, resolved_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(drive_peer(
            index,
            Arc::clone(&peer.node),
            events,
            health,
            resolved_tx,
        ));

        peer.discovery.begin_matchmaking().await?;

        // The first peer must finish promoting before the others search,
        // otherwise every peer would promote itself at the same time.
        if index == 0 {
            tokio::select! {
                _ = resolved_rx => {}
                () = shutdown_signal() => {
                    shutdown(&health_state, &shutdown_token, &peers).await;
                    return Ok(());
                }
            }
        }

        peers.push(peer);
    }

    info!("Match Coordinator running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    shutdown(&health_state, &shutdown_token, &peers).await;
    Ok(())
}

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = tracing_subscriber::EnvFilter::try_new(&observability.log_filter)
        .unwrap_or_else(|_| common::config::DEFAULT_LOG_FILTER.into());

    if observability.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Follow one peer's discovery events; ready up once it has a room.
///
/// `resolved` fires when the peer first hosts or joins.
async fn drive_peer(
    index: usize,
    node: Arc<LoopbackNode>,
    mut events: match_coordinator::events::EventReceiver,
    health: Option<Arc<HealthState>>,
    resolved: tokio::sync::oneshot::Sender<()>,
) {
    let mut resolved = Some(resolved);
    let set_role = |role: PeerRole| {
        if let Some(health) = &health {
            health.set_role(role);
        }
    };

    while let Some(event) = events.recv().await {
        match event {
            LobbyEvent::SearchStarted => {
                info!(peer = index, "Searching for a match");
                set_role(PeerRole::Searching);
            }
            LobbyEvent::Connecting { host } => {
                info!(peer = index, host = %host.locator, server_name = %host.server_name, "Connecting");
            }
            LobbyEvent::Joined { host } => {
                info!(peer = index, host = %host.locator, "Joined match");
                set_role(PeerRole::Client);
                ready_up(index, &node).await;
                if let Some(tx) = resolved.take() {
                    let _ = tx.send(());
                }
            }
            LobbyEvent::HostingStarted { locator, .. } => {
                info!(peer = index, locator = %locator, "Hosting match");
                set_role(PeerRole::Host);
                ready_up(index, &node).await;
                if let Some(tx) = resolved.take() {
                    let _ = tx.send(());
                }
            }
            LobbyEvent::Cancelled => {
                info!(peer = index, "Matchmaking cancelled");
                set_role(PeerRole::Idle);
            }
            other => {
                warn!(peer = index, event = ?other, "Unexpected discovery event");
            }
        }
    }
}

/// Subscribe to the room, log its progress, then mark this peer ready.
async fn ready_up(index: usize, node: &LoopbackNode) {
    match node.room_events().await {
        Ok((_subscription, mut room_events)) => {
            tokio::spawn(async move {
                while let Some(event) = room_events.recv().await {
                    match event {
                        LobbyEvent::QueueStatus {
                            ready_count,
                            required,
                        } => info!(peer = index, ready_count, required, "Queue status"),
                        LobbyEvent::CountdownTick { seconds } => {
                            info!(peer = index, seconds, "Match starting in");
                        }
                        LobbyEvent::CountdownCancelled => info!(peer = index, "Countdown cancelled"),
                        LobbyEvent::MatchStart => info!(peer = index, "Match started"),
                        _ => {}
                    }
                }
            });
        }
        Err(e) => {
            warn!(peer = index, error = %e, "Could not follow room events");
        }
    }

    if let Err(e) = node.set_ready(true).await {
        warn!(peer = index, error = %e, "Failed to ready up");
    }
}

async fn shutdown(health_state: &HealthState, shutdown_token: &CancellationToken, peers: &[LoopbackPeer]) {
    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not live immediately so health checks stop routing here
    health_state.set_not_live();

    for peer in peers {
        cancel_quietly(&peer.discovery).await;
    }
    shutdown_token.cancel();

    tokio::time::sleep(SHUTDOWN_GRACE).await;
    info!("Match Coordinator shutdown complete");
}

async fn cancel_quietly(discovery: &DiscoveryHandle) {
    if let Err(e) = discovery.cancel_matchmaking().await {
        warn!(error = %e, "Failed to cancel matchmaking");
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
