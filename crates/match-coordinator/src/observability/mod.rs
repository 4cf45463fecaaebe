//! Observability for the match coordinator.
//!
//! Metric labels are bounded; no participant or server id ever becomes a
//! label value.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `qm_participants_connected` | Gauge | none | Participants in the hosted room |
//! | `qm_countdowns_started_total` | Counter | none | Countdowns started on quorum |
//! | `qm_countdowns_cancelled_total` | Counter | `reason` | Countdowns that ended without a match |
//! | `qm_matches_started_total` | Counter | none | Committed match starts |
//! | `qm_discovery_outcomes_total` | Counter | `outcome` | How discovery sessions resolved |
//! | `qm_join_attempt_duration_seconds` | Histogram | `status` | Join attempt latency |
//! | `qm_stale_callbacks_total` | Counter | `source` | Superseded timer/connect results |
//! | `qm_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure indicator |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState, PeerRole};
pub use metrics::init_metrics_recorder;
