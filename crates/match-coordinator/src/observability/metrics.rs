//! Metrics definitions for the match coordinator.
//!
//! All metrics follow Prometheus naming conventions:
//! - `qm_` prefix for Quickmatch
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Every label takes values from a fixed set defined in code:
//! - `actor_type`: room, discovery
//! - `reason`: quorum_lost, recheck_failed, shutdown
//! - `outcome`: joined, self_hosted, connect_failed, cancelled, host_failed
//! - `source`: countdown, connect

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Join attempts run on a LAN but are bounded by the connect timeout
        .set_buckets_for_metric(
            Matcher::Prefix("qm_join_attempt".to_string()),
            &[0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000],
        )
        .map_err(|e| format!("Failed to set join attempt buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Room Metrics
// ============================================================================

/// Metric: `qm_participants_connected`
pub fn set_participants_connected(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("qm_participants_connected").set(count as f64);
}

/// Metric: `qm_countdowns_started_total`
pub fn record_countdown_started() {
    counter!("qm_countdowns_started_total").increment(1);
}

/// Record a countdown that ended without a match.
///
/// Metric: `qm_countdowns_cancelled_total`
/// Labels: `reason`
pub fn record_countdown_cancelled(reason: &'static str) {
    counter!("qm_countdowns_cancelled_total", "reason" => reason).increment(1);
}

/// Metric: `qm_matches_started_total`
pub fn record_match_started() {
    counter!("qm_matches_started_total").increment(1);
}

// ============================================================================
// Discovery Metrics
// ============================================================================

/// Record how a discovery session resolved.
///
/// Metric: `qm_discovery_outcomes_total`
/// Labels: `outcome`
pub fn record_discovery_outcome(outcome: &'static str) {
    counter!("qm_discovery_outcomes_total", "outcome" => outcome).increment(1);
}

/// Record the duration of one join attempt.
///
/// Metric: `qm_join_attempt_duration_seconds`
/// Labels: `status` (success, error)
pub fn record_join_attempt(status: &'static str, duration: Duration) {
    histogram!("qm_join_attempt_duration_seconds", "status" => status)
        .record(duration.as_secs_f64());
}

// ============================================================================
// Actor Metrics
// ============================================================================

/// Record a timer or connection result discarded because it was superseded.
///
/// Metric: `qm_stale_callbacks_total`
/// Labels: `source`
pub fn record_stale_callback(source: &'static str) {
    counter!("qm_stale_callbacks_total", "source" => source).increment(1);
}

/// Metric: `qm_actor_mailbox_depth`
/// Labels: `actor_type`
pub fn set_actor_mailbox_depth(actor_type: &'static str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("qm_actor_mailbox_depth", "actor_type" => actor_type).set(depth as f64);
}
