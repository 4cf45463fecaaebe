//! Integration tests for the discovery coordinator against a scripted network.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use common::types::ServerId;
use match_coordinator::actors::{
    DiscoveryActor, DiscoveryConfig, DiscoveryHandle, DiscoveryPhase, RetryDeadline,
    SplitBrainPolicy,
};
use match_coordinator::errors::MatchError;
use match_coordinator::events::LobbyEvent;
use match_test_utils::fixtures::{discovery_config, host_response};
use match_test_utils::{ConnectBehavior, EventRecorder, MockNetwork, NetworkCall};
use tokio_util::sync::CancellationToken;

const OWN_ID: u64 = 50;
const HOST: &str = "192.168.1.20:7777";

async fn spawn(config: DiscoveryConfig, network: &MockNetwork) -> (DiscoveryHandle, EventRecorder) {
    let (handle, _task) = DiscoveryActor::spawn(
        config,
        ServerId::from_raw(OWN_ID),
        network.as_network(),
        CancellationToken::new(),
    );
    let (_id, events) = handle.subscribe().await.unwrap();
    (handle, EventRecorder::new(events))
}

async fn phase(handle: &DiscoveryHandle) -> DiscoveryPhase {
    handle.get_state().await.unwrap().phase
}

fn is_hosting(event: &LobbyEvent) -> bool {
    matches!(event, LobbyEvent::HostingStarted { .. })
}

fn is_joined(event: &LobbyEvent) -> bool {
    matches!(event, LobbyEvent::Joined { .. })
}

// ============================================================================
// Search and join
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_first_response_is_joined() {
    let network = MockNetwork::new();
    let (handle, mut events) = spawn(discovery_config(3_000), &network).await;

    handle.begin_matchmaking().await.unwrap();
    handle.discovery_response(host_response(7, HOST)).await.unwrap();

    let joined = events.wait_for(Duration::from_secs(1), is_joined).await;
    match joined {
        LobbyEvent::Joined { host } => {
            assert_eq!(host.server_id, ServerId::from_raw(7));
            assert_eq!(host.locator, HOST.parse().unwrap());
        }
        other => panic!("unexpected event {other:?}"),
    }

    // Searching stopped before the join attempt
    let stop = network.position(&NetworkCall::StopDiscovery).unwrap();
    let join = network
        .position(&NetworkCall::StartAsClient(HOST.parse().unwrap()))
        .unwrap();
    assert!(stop < join);

    // A joined peer never promotes itself
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(phase(&handle).await, DiscoveryPhase::Joined);
    assert_eq!(network.count(&NetworkCall::StartAsHost), 0);
}

#[tokio::test(start_paused = true)]
async fn test_responses_after_join_are_ignored() {
    let network = MockNetwork::new();
    let (handle, mut events) = spawn(discovery_config(3_000), &network).await;

    handle.begin_matchmaking().await.unwrap();
    handle.discovery_response(host_response(7, HOST)).await.unwrap();
    events.wait_for(Duration::from_secs(1), is_joined).await;

    handle
        .discovery_response(host_response(8, "192.168.1.21:7777"))
        .await
        .unwrap();
    handle.get_state().await.unwrap();

    let attempts = network
        .calls()
        .iter()
        .filter(|c| matches!(c, NetworkCall::StartAsClient(_)))
        .count();
    assert_eq!(attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_rebroadcasts_while_searching() {
    let network = MockNetwork::new();
    let (handle, _events) = spawn(discovery_config(1_000), &network).await;

    handle.begin_matchmaking().await.unwrap();
    tokio::time::sleep(Duration::from_millis(550)).await;

    assert!(network.count(&NetworkCall::BroadcastDiscoveryRequest) >= 5);
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_resumes_search() {
    let network = MockNetwork::new().with_connect(ConnectBehavior::Hang);
    let (handle, mut events) = spawn(discovery_config(3_000), &network).await;

    handle.begin_matchmaking().await.unwrap();
    handle.discovery_response(host_response(7, HOST)).await.unwrap();

    // connect_timeout is 1s; the original 3s window still applies after that
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    let state = handle.get_state().await.unwrap();
    assert_eq!(state.phase, DiscoveryPhase::Searching);
    assert!(state.found_host.is_none());
    assert_eq!(network.count(&NetworkCall::StopClient), 1);

    events.wait_for(Duration::from_secs(3), is_hosting).await;
    assert_eq!(
        events.count(|e| matches!(e, LobbyEvent::SearchStarted)),
        2,
        "search resumes once after the failed join"
    );
}

// ============================================================================
// Deadline handling after a failed join
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_failed_join_keeps_original_deadline() {
    let network = MockNetwork::new().with_connect(ConnectBehavior::Refuse);
    let (handle, _events) = spawn(discovery_config(2_000), &network).await;

    handle.begin_matchmaking().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    handle.discovery_response(host_response(7, HOST)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(phase(&handle).await, DiscoveryPhase::SelfHosting);
}

#[tokio::test(start_paused = true)]
async fn test_failed_join_restarts_deadline_when_configured() {
    let network = MockNetwork::new().with_connect(ConnectBehavior::Refuse);
    let config = DiscoveryConfig {
        retry_deadline: RetryDeadline::Restart,
        ..discovery_config(2_000)
    };
    let (handle, _events) = spawn(config, &network).await;

    handle.begin_matchmaking().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    handle.discovery_response(host_response(7, HOST)).await.unwrap();

    // Fresh window from ~1.5s: still searching at 3s, hosting after 3.5s
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(phase(&handle).await, DiscoveryPhase::Searching);

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(phase(&handle).await, DiscoveryPhase::SelfHosting);
}

// ============================================================================
// Self-promotion
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_self_promotion_advertises_after_search_stops() {
    let network = MockNetwork::new();
    let (handle, mut events) = spawn(discovery_config(500), &network).await;

    handle.begin_matchmaking().await.unwrap();
    let event = events.wait_for(Duration::from_secs(1), is_hosting).await;
    assert_eq!(
        event,
        LobbyEvent::HostingStarted {
            server_id: ServerId::from_raw(OWN_ID),
            locator: "127.0.0.1:7777".parse().unwrap(),
        }
    );

    let stop = network.last_position(&NetworkCall::StopDiscovery).unwrap();
    let host = network.position(&NetworkCall::StartAsHost).unwrap();
    let advertise = network
        .position(&NetworkCall::StartAdvertising {
            server_id: ServerId::from_raw(OWN_ID),
            server_name: "Quickmatch".to_string(),
        })
        .unwrap();
    assert!(stop < host && host < advertise);

    let state = handle.get_state().await.unwrap();
    assert_eq!(state.hosted_locator, Some("127.0.0.1:7777".parse().unwrap()));
    assert!(network.is_advertising());
}

#[tokio::test(start_paused = true)]
async fn test_host_failure_returns_to_idle() {
    let network = MockNetwork::new().with_host_failure();
    let (handle, mut events) = spawn(discovery_config(500), &network).await;

    handle.begin_matchmaking().await.unwrap();
    events
        .wait_for(Duration::from_secs(1), |e| *e == LobbyEvent::Cancelled)
        .await;

    assert_eq!(phase(&handle).await, DiscoveryPhase::Idle);
    assert!(!network.is_advertising());

    // Matchmaking can be retried
    handle.begin_matchmaking().await.unwrap();
    assert_eq!(phase(&handle).await, DiscoveryPhase::Searching);
}

#[tokio::test(start_paused = true)]
async fn test_advertise_failure_stops_hosting() {
    let network = MockNetwork::new().with_advertise_failure();
    let (handle, mut events) = spawn(discovery_config(500), &network).await;

    handle.begin_matchmaking().await.unwrap();
    events
        .wait_for(Duration::from_secs(1), |e| *e == LobbyEvent::Cancelled)
        .await;

    assert_eq!(phase(&handle).await, DiscoveryPhase::Idle);
    assert!(!network.is_hosting());
    assert_eq!(network.count(&NetworkCall::StopHost), 1);
}

#[tokio::test(start_paused = true)]
async fn test_begin_while_hosting_is_role_conflict() {
    let network = MockNetwork::new();
    let (handle, mut events) = spawn(discovery_config(500), &network).await;

    handle.begin_matchmaking().await.unwrap();
    events.wait_for(Duration::from_secs(1), is_hosting).await;

    let result = handle.begin_matchmaking().await;
    assert!(matches!(result, Err(MatchError::RoleConflict(_))));
    assert_eq!(phase(&handle).await, DiscoveryPhase::SelfHosting);
}

#[tokio::test(start_paused = true)]
async fn test_begin_with_active_session_is_role_conflict() {
    let network = MockNetwork::new();
    network.set_client(true);
    let (handle, mut events) = spawn(discovery_config(500), &network).await;

    let result = handle.begin_matchmaking().await;
    assert!(matches!(result, Err(MatchError::RoleConflict(_))));
    assert_eq!(phase(&handle).await, DiscoveryPhase::Idle);
    assert!(events.drain().is_empty());
    assert_eq!(network.count(&NetworkCall::BroadcastDiscoveryRequest), 0);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_cancel_while_connecting_discards_late_join() {
    let network =
        MockNetwork::new().with_connect(ConnectBehavior::SucceedAfter(Duration::from_millis(500)));
    let (handle, mut events) = spawn(discovery_config(3_000), &network).await;

    handle.begin_matchmaking().await.unwrap();
    handle.discovery_response(host_response(7, HOST)).await.unwrap();
    handle.cancel_matchmaking().await.unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(phase(&handle).await, DiscoveryPhase::Idle);
    assert!(!network.is_joined());
    assert_eq!(events.count(is_joined), 0);
    assert_eq!(network.count(&NetworkCall::StartAsHost), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_hosting_stops_advertising_then_host() {
    let network = MockNetwork::new();
    let (handle, mut events) = spawn(discovery_config(500), &network).await;

    handle.begin_matchmaking().await.unwrap();
    events.wait_for(Duration::from_secs(1), is_hosting).await;
    handle.cancel_matchmaking().await.unwrap();

    let stop_advertising = network.position(&NetworkCall::StopAdvertising).unwrap();
    let stop_host = network.position(&NetworkCall::StopHost).unwrap();
    assert!(stop_advertising < stop_host);

    let state = handle.get_state().await.unwrap();
    assert_eq!(state.phase, DiscoveryPhase::Idle);
    assert!(state.hosted_locator.is_none());
    assert_eq!(events.drain().last(), Some(&LobbyEvent::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_host_loss_while_joined_cancels() {
    let network = MockNetwork::new();
    let (handle, mut events) = spawn(discovery_config(3_000), &network).await;

    handle.begin_matchmaking().await.unwrap();
    handle.discovery_response(host_response(7, HOST)).await.unwrap();
    events.wait_for(Duration::from_secs(1), is_joined).await;

    handle.client_disconnected().await.unwrap();
    events
        .wait_for(Duration::from_secs(1), |e| *e == LobbyEvent::Cancelled)
        .await;

    assert_eq!(phase(&handle).await, DiscoveryPhase::Idle);
    assert_eq!(network.count(&NetworkCall::StopClient), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_undoes_hosting() {
    let network = MockNetwork::new();
    let (handle, task) = DiscoveryActor::spawn(
        discovery_config(500),
        ServerId::from_raw(OWN_ID),
        network.as_network(),
        CancellationToken::new(),
    );

    handle.begin_matchmaking().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(network.is_hosting());

    handle.cancel();
    task.await.unwrap();

    assert!(!network.is_hosting());
    assert!(!network.is_advertising());
}

// ============================================================================
// Split brain
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_lower_host_yields_to_higher_server_id() {
    let network = MockNetwork::new();
    let config = DiscoveryConfig {
        split_brain_policy: SplitBrainPolicy::HighestServerIdWins,
        ..discovery_config(500)
    };
    let (handle, mut events) = spawn(config, &network).await;

    handle.begin_matchmaking().await.unwrap();
    events.wait_for(Duration::from_secs(1), is_hosting).await;

    // Lower id: keep hosting
    handle.discovery_response(host_response(10, HOST)).await.unwrap();
    assert_eq!(phase(&handle).await, DiscoveryPhase::SelfHosting);

    // Higher id: tear down and join
    handle.discovery_response(host_response(90, HOST)).await.unwrap();
    events.wait_for(Duration::from_secs(1), is_joined).await;

    assert!(!network.is_hosting());
    assert!(!network.is_advertising());
    assert!(network.is_joined());
}

#[tokio::test(start_paused = true)]
async fn test_ignore_policy_keeps_hosting() {
    let network = MockNetwork::new();
    let (handle, mut events) = spawn(discovery_config(500), &network).await;

    handle.begin_matchmaking().await.unwrap();
    events.wait_for(Duration::from_secs(1), is_hosting).await;

    handle.discovery_response(host_response(90, HOST)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(phase(&handle).await, DiscoveryPhase::SelfHosting);
    assert!(network.is_advertising());
}
