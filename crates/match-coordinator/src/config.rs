//! Match coordinator configuration.
//!
//! Configuration is loaded from environment variables. Values that parse but
//! fall outside their valid range are clamped with a warning; values that do
//! not parse at all are rejected.

use crate::actors::discovery::{DiscoveryConfig, RetryDeadline, SplitBrainPolicy};
use crate::actors::room::RoomConfig;
use crate::quorum::QuorumPolicy;
use common::config::{ObservabilityConfig, DEFAULT_LOG_FILTER};
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Default number of ready players needed to start a match.
pub const DEFAULT_REQUIRED_PLAYERS: usize = 2;

/// Default cap on simultaneous connections to a host.
pub const DEFAULT_MAX_CONNECTIONS: usize = 16;

/// Default countdown between quorum and match start.
pub const DEFAULT_MATCH_START_DELAY_SECONDS: f64 = 3.0;

/// Default time spent searching before self-promotion.
pub const DEFAULT_DISCOVERY_WINDOW_SECONDS: f64 = 3.0;

/// Default re-broadcast interval while searching.
pub const DEFAULT_DISCOVERY_INTERVAL_MS: u64 = 1000;

/// Default bound on a single join attempt.
pub const DEFAULT_CONNECT_TIMEOUT_SECONDS: f64 = 5.0;

/// Default advertised host name.
pub const DEFAULT_ADVERTISED_SERVER_NAME: &str = "Quickmatch";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default number of peers the demo binary runs.
pub const DEFAULT_SIMULATED_PEERS: usize = 3;

/// Longest duration any seconds-valued option may take.
const MAX_SECONDS: f64 = 86_400.0;

/// Match coordinator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Ready players needed before a match starts (always `>= 1`).
    pub required_players: usize,

    /// Connection cap on the host; upper bound for `required_players`.
    pub max_connections: usize,

    /// Require every connected player to be ready.
    pub require_all_ready: bool,

    /// Countdown length once the quorum is met.
    pub match_start_delay: Duration,

    /// Time spent searching for a host before self-promotion.
    pub discovery_window: Duration,

    /// Re-broadcast interval for discovery requests.
    pub discovery_interval: Duration,

    /// Bound on a single join attempt.
    pub connect_timeout: Duration,

    /// Deadline handling after a failed join.
    pub retry_deadline: RetryDeadline,

    /// Reaction to a second host on the network.
    pub split_brain_policy: SplitBrainPolicy,

    /// Name advertised while hosting.
    pub advertised_server_name: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Peers spawned by the demo binary.
    pub simulated_peers: usize,

    /// Logging configuration.
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let requested_players: i64 =
            parse_var(vars, "QM_REQUIRED_PLAYERS", DEFAULT_REQUIRED_PLAYERS as i64)?;
        let max_connections: usize =
            parse_var(vars, "QM_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?;
        let (required_players, max_connections) =
            apply_player_count_constraints(requested_players, max_connections);

        let require_all_ready = parse_var(vars, "QM_REQUIRE_ALL_READY", false)?;

        let match_start_delay = parse_seconds(
            vars,
            "QM_MATCH_START_DELAY_SECONDS",
            DEFAULT_MATCH_START_DELAY_SECONDS,
        )?;
        let discovery_window = parse_seconds(
            vars,
            "QM_DISCOVERY_WINDOW_SECONDS",
            DEFAULT_DISCOVERY_WINDOW_SECONDS,
        )?;
        let connect_timeout = parse_seconds(
            vars,
            "QM_CONNECT_TIMEOUT_SECONDS",
            DEFAULT_CONNECT_TIMEOUT_SECONDS,
        )?;

        let interval_ms: u64 =
            parse_var(vars, "QM_DISCOVERY_INTERVAL_MS", DEFAULT_DISCOVERY_INTERVAL_MS)?;
        // A zero interval would make tokio::time::interval panic.
        let discovery_interval = Duration::from_millis(interval_ms.max(1));

        let retry_deadline = parse_var(vars, "QM_RETRY_DEADLINE", RetryDeadline::default())?;
        let split_brain_policy =
            parse_var(vars, "QM_SPLIT_BRAIN_POLICY", SplitBrainPolicy::default())?;

        let advertised_server_name = vars
            .get("QM_ADVERTISED_SERVER_NAME")
            .cloned()
            .unwrap_or_else(|| DEFAULT_ADVERTISED_SERVER_NAME.to_string());

        let health_bind_address = vars
            .get("QM_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let simulated_peers: usize =
            parse_var(vars, "QM_SIMULATED_PEERS", DEFAULT_SIMULATED_PEERS)?;

        let observability = ObservabilityConfig {
            log_filter: vars
                .get("RUST_LOG")
                .cloned()
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            json_logs: parse_var(vars, "QM_LOG_JSON", false)?,
        };

        Ok(Config {
            required_players,
            max_connections,
            require_all_ready,
            match_start_delay,
            discovery_window,
            discovery_interval,
            connect_timeout,
            retry_deadline,
            split_brain_policy,
            advertised_server_name,
            health_bind_address,
            simulated_peers,
            observability,
        })
    }

    /// Quorum settings for the room coordinator.
    #[must_use]
    pub fn quorum_policy(&self) -> QuorumPolicy {
        QuorumPolicy::new(self.required_players, self.require_all_ready)
    }

    /// Settings for a room coordinator running on this peer.
    #[must_use]
    pub fn room_config(&self) -> RoomConfig {
        RoomConfig {
            policy: self.quorum_policy(),
            match_start_delay: self.match_start_delay,
            max_connections: self.max_connections,
        }
    }

    /// Settings for the discovery coordinator.
    #[must_use]
    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            discovery_window: self.discovery_window,
            discovery_interval: self.discovery_interval,
            connect_timeout: self.connect_timeout,
            retry_deadline: self.retry_deadline,
            split_brain_policy: self.split_brain_policy,
            advertised_server_name: self.advertised_server_name.clone(),
        }
    }
}

/// Clamp the player count into `[1, max_connections]`.
///
/// A zero connection cap means "no cap configured" and falls back to the
/// requested player count.
fn apply_player_count_constraints(requested: i64, max_connections: usize) -> (usize, usize) {
    let requested_usize = usize::try_from(requested).unwrap_or(0);
    let max_allowed = if max_connections > 0 {
        max_connections
    } else {
        requested_usize.max(1)
    };
    let required = requested_usize.clamp(1, max_allowed);

    if i64::try_from(required).ok() != Some(requested) {
        warn!(
            target: "qm.config",
            requested,
            required,
            max_allowed,
            "Required player count out of range, clamped"
        );
    }

    (required, max_allowed)
}

fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            value: raw.clone(),
        }),
        None => Ok(default),
    }
}

fn parse_seconds(
    vars: &HashMap<String, String>,
    name: &str,
    default: f64,
) -> Result<Duration, ConfigError> {
    let seconds: f64 = parse_var(vars, name, default)?;
    if seconds.is_nan() {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            value: seconds.to_string(),
        });
    }

    let clamped = seconds.clamp(0.0, MAX_SECONDS);
    if (clamped - seconds).abs() > f64::EPSILON {
        warn!(
            target: "qm.config",
            name,
            requested = seconds,
            clamped,
            "Duration out of range, clamped"
        );
    }

    Ok(Duration::try_from_secs_f64(clamped).unwrap_or_default())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("Config should load successfully");

        assert_eq!(config.required_players, DEFAULT_REQUIRED_PLAYERS);
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert!(!config.require_all_ready);
        assert_eq!(config.match_start_delay, Duration::from_secs(3));
        assert_eq!(config.discovery_window, Duration::from_secs(3));
        assert_eq!(config.discovery_interval, Duration::from_millis(1000));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.retry_deadline, RetryDeadline::Original);
        assert_eq!(config.split_brain_policy, SplitBrainPolicy::Ignore);
        assert_eq!(config.advertised_server_name, DEFAULT_ADVERTISED_SERVER_NAME);
        assert_eq!(config.health_bind_address, DEFAULT_HEALTH_BIND_ADDRESS);
        assert!(!config.observability.json_logs);
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let config = Config::from_vars(&vars(&[
            ("QM_REQUIRED_PLAYERS", "4"),
            ("QM_MAX_CONNECTIONS", "8"),
            ("QM_REQUIRE_ALL_READY", "true"),
            ("QM_MATCH_START_DELAY_SECONDS", "2.5"),
            ("QM_DISCOVERY_WINDOW_SECONDS", "1"),
            ("QM_DISCOVERY_INTERVAL_MS", "250"),
            ("QM_CONNECT_TIMEOUT_SECONDS", "0.5"),
            ("QM_RETRY_DEADLINE", "restart"),
            ("QM_SPLIT_BRAIN_POLICY", "highest-server-id"),
            ("QM_ADVERTISED_SERVER_NAME", "Museum Match"),
            ("QM_LOG_JSON", "true"),
        ]))
        .expect("Config should load successfully");

        assert_eq!(config.required_players, 4);
        assert_eq!(config.max_connections, 8);
        assert!(config.require_all_ready);
        assert_eq!(config.match_start_delay, Duration::from_millis(2500));
        assert_eq!(config.discovery_window, Duration::from_secs(1));
        assert_eq!(config.discovery_interval, Duration::from_millis(250));
        assert_eq!(config.connect_timeout, Duration::from_millis(500));
        assert_eq!(config.retry_deadline, RetryDeadline::Restart);
        assert_eq!(
            config.split_brain_policy,
            SplitBrainPolicy::HighestServerIdWins
        );
        assert_eq!(config.advertised_server_name, "Museum Match");
        assert!(config.observability.json_logs);
    }

    #[test]
    fn test_required_players_clamped_to_at_least_one() {
        let config = Config::from_vars(&vars(&[("QM_REQUIRED_PLAYERS", "0")])).unwrap();
        assert_eq!(config.required_players, 1);

        let config = Config::from_vars(&vars(&[("QM_REQUIRED_PLAYERS", "-3")])).unwrap();
        assert_eq!(config.required_players, 1);
    }

    #[test]
    fn test_required_players_clamped_to_max_connections() {
        let config = Config::from_vars(&vars(&[
            ("QM_REQUIRED_PLAYERS", "10"),
            ("QM_MAX_CONNECTIONS", "4"),
        ]))
        .unwrap();
        assert_eq!(config.required_players, 4);
    }

    #[test]
    fn test_zero_max_connections_falls_back_to_required_players() {
        let config = Config::from_vars(&vars(&[
            ("QM_REQUIRED_PLAYERS", "6"),
            ("QM_MAX_CONNECTIONS", "0"),
        ]))
        .unwrap();
        assert_eq!(config.required_players, 6);
        assert_eq!(config.max_connections, 6);
    }

    #[test]
    fn test_negative_durations_clamp_to_zero() {
        let config = Config::from_vars(&vars(&[
            ("QM_MATCH_START_DELAY_SECONDS", "-2"),
            ("QM_DISCOVERY_WINDOW_SECONDS", "-0.5"),
        ]))
        .unwrap();
        assert_eq!(config.match_start_delay, Duration::ZERO);
        assert_eq!(config.discovery_window, Duration::ZERO);
    }

    #[test]
    fn test_unparseable_value_is_rejected() {
        let result = Config::from_vars(&vars(&[("QM_REQUIRED_PLAYERS", "two")]));
        assert!(
            matches!(result, Err(ConfigError::InvalidValue { name, .. }) if name == "QM_REQUIRED_PLAYERS")
        );

        let result = Config::from_vars(&vars(&[("QM_RETRY_DEADLINE", "sometimes")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));

        let result = Config::from_vars(&vars(&[("QM_MATCH_START_DELAY_SECONDS", "NaN")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_room_config_carries_quorum_settings() {
        let config = Config::from_vars(&vars(&[
            ("QM_REQUIRED_PLAYERS", "3"),
            ("QM_REQUIRE_ALL_READY", "true"),
        ]))
        .unwrap();

        let room = config.room_config();
        assert_eq!(room.policy.required_count(), 3);
        assert!(room.policy.require_all());
        assert_eq!(room.match_start_delay, Duration::from_secs(3));
    }
}
