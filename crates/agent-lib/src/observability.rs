//! Observability infrastructure for the failover agent
//!
//! Provides:
//! - Prometheus metrics (role, transitions, heartbeat counters, runtime errors)
//! - Structured JSON logging with tracing

use crate::models::{ContainerState, DecisionReason, NodeRole};
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, register_int_gauge_vec, Gauge, Histogram, IntCounter, IntCounterVec,
    IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Default histogram buckets for runtime poll latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<FailoverMetricsInner> = OnceLock::new();

struct FailoverMetricsInner {
    role: IntGauge,
    engaged: IntGauge,
    role_transitions: IntCounterVec,
    heartbeats_sent: IntCounter,
    heartbeats_failed: IntCounter,
    heartbeats_received: IntCounter,
    heartbeats_rejected: IntCounter,
    heartbeat_age_seconds: Gauge,
    runtime_errors: IntCounterVec,
    container_up: IntGaugeVec,
    poll_latency_seconds: Histogram,
}

impl FailoverMetricsInner {
    fn new() -> Self {
        Self {
            role: register_int_gauge!(
                "failover_agent_role_active",
                "1 when this node holds the active role, 0 when passive"
            )
            .expect("Failed to register role_active"),

            engaged: register_int_gauge!(
                "failover_agent_engaged",
                "1 once the startup grace period is over and the role is operative"
            )
            .expect("Failed to register engaged"),

            role_transitions: register_int_counter_vec!(
                "failover_agent_role_transitions_total",
                "Role decisions taken, by reason",
                &["role", "reason"]
            )
            .expect("Failed to register role_transitions_total"),

            heartbeats_sent: register_int_counter!(
                "failover_agent_heartbeats_sent_total",
                "Heartbeats acknowledged by the peer"
            )
            .expect("Failed to register heartbeats_sent_total"),

            heartbeats_failed: register_int_counter!(
                "failover_agent_heartbeats_failed_total",
                "Heartbeats that failed, timed out or got a non-success response"
            )
            .expect("Failed to register heartbeats_failed_total"),

            heartbeats_received: register_int_counter!(
                "failover_agent_heartbeats_received_total",
                "Well-formed heartbeats received from the peer"
            )
            .expect("Failed to register heartbeats_received_total"),

            heartbeats_rejected: register_int_counter!(
                "failover_agent_heartbeats_rejected_total",
                "Malformed heartbeat requests rejected"
            )
            .expect("Failed to register heartbeats_rejected_total"),

            heartbeat_age_seconds: register_gauge!(
                "failover_agent_heartbeat_age_seconds",
                "Seconds since the last heartbeat was received, -1 if never"
            )
            .expect("Failed to register heartbeat_age_seconds"),

            runtime_errors: register_int_counter_vec!(
                "failover_agent_runtime_errors_total",
                "Container runtime calls that failed or timed out",
                &["operation"]
            )
            .expect("Failed to register runtime_errors_total"),

            container_up: register_int_gauge_vec!(
                "failover_agent_container_up",
                "1 when the managed container was last observed running",
                &["container"]
            )
            .expect("Failed to register container_up"),

            poll_latency_seconds: register_histogram!(
                "failover_agent_poll_latency_seconds",
                "Time spent polling the runtime for all managed containers",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register poll_latency_seconds"),
        }
    }
}

/// Failover metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the same
/// underlying metrics.
#[derive(Clone)]
pub struct FailoverMetrics {
    _private: (),
}

impl Default for FailoverMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl FailoverMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(FailoverMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &FailoverMetricsInner {
        GLOBAL_METRICS.get_or_init(FailoverMetricsInner::new)
    }

    pub fn set_role(&self, role: NodeRole) {
        self.inner()
            .role
            .set(if role == NodeRole::Active { 1 } else { 0 });
    }

    pub fn set_engaged(&self, engaged: bool) {
        self.inner().engaged.set(engaged as i64);
    }

    pub fn inc_role_transition(&self, role: NodeRole, reason: DecisionReason) {
        self.inner()
            .role_transitions
            .with_label_values(&[role.as_str(), reason.as_str()])
            .inc();
    }

    pub fn inc_heartbeats_sent(&self) {
        self.inner().heartbeats_sent.inc();
    }

    pub fn inc_heartbeats_failed(&self) {
        self.inner().heartbeats_failed.inc();
    }

    pub fn inc_heartbeats_received(&self) {
        self.inner().heartbeats_received.inc();
    }

    pub fn inc_heartbeats_rejected(&self) {
        self.inner().heartbeats_rejected.inc();
    }

    pub fn set_heartbeat_age(&self, age_secs: Option<f64>) {
        self.inner().heartbeat_age_seconds.set(age_secs.unwrap_or(-1.0));
    }

    pub fn inc_runtime_errors(&self, operation: &str) {
        self.inner()
            .runtime_errors
            .with_label_values(&[operation])
            .inc();
    }

    pub fn set_container_up(&self, container: &str, up: bool) {
        self.inner()
            .container_up
            .with_label_values(&[container])
            .set(up as i64);
    }

    pub fn observe_poll_latency(&self, duration_secs: f64) {
        self.inner().poll_latency_seconds.observe(duration_secs);
    }
}

/// Structured logger for failover events
///
/// Emits one canonical JSON record per significant event, keyed by `event`.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str, intended_role: NodeRole, containers: usize) {
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            intended_role = %intended_role,
            containers = containers,
            "Failover agent started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Failover agent shutting down"
        );
    }

    /// Log a role decision
    pub fn log_role_change(
        &self,
        previous: Option<NodeRole>,
        role: NodeRole,
        reason: DecisionReason,
    ) {
        let previous = previous.map(|r| r.as_str()).unwrap_or("none");
        warn!(
            event = "role_changed",
            node = %self.node_name,
            previous_role = %previous,
            role = %role,
            reason = %reason,
            "Role changed"
        );
    }

    /// Log a container state transition
    pub fn log_container_state(
        &self,
        container: &str,
        previous: ContainerState,
        current: ContainerState,
        error: Option<&str>,
    ) {
        match (current, error) {
            (ContainerState::Running, _) => info!(
                event = "container_state_changed",
                node = %self.node_name,
                container = %container,
                previous = ?previous,
                current = ?current,
                "Container is running"
            ),
            (_, Some(error)) => error!(
                event = "container_state_changed",
                node = %self.node_name,
                container = %container,
                previous = ?previous,
                current = ?current,
                error = %error,
                "Container runtime unavailable, counting container as down"
            ),
            (_, None) => warn!(
                event = "container_state_changed",
                node = %self.node_name,
                container = %container,
                previous = ?previous,
                current = ?current,
                "Container is down, restart grace period started"
            ),
        }
    }

    /// Log a change of the rolled-up local health
    pub fn log_health_change(&self, previous: &str, current: &str) {
        if current == "healthy" {
            info!(
                event = "local_health_changed",
                node = %self.node_name,
                previous = %previous,
                current = %current,
                "Local containers healthy"
            );
        } else {
            warn!(
                event = "local_health_changed",
                node = %self.node_name,
                previous = %previous,
                current = %current,
                "Local containers unhealthy"
            );
        }
    }

    /// Log a change of peer heartbeat freshness
    pub fn log_heartbeat_freshness(&self, fresh: bool, age_secs: Option<f64>) {
        if fresh {
            info!(
                event = "heartbeat_freshness_changed",
                node = %self.node_name,
                fresh = true,
                age_secs = ?age_secs,
                "Peer heartbeat is fresh"
            );
        } else {
            warn!(
                event = "heartbeat_freshness_changed",
                node = %self.node_name,
                fresh = false,
                age_secs = ?age_secs,
                "Peer heartbeat is stale"
            );
        }
    }

    /// Log that both nodes appear to hold the active role
    pub fn log_split_brain_suspected(&self, peer: Option<&str>) {
        warn!(
            event = "split_brain_suspected",
            node = %self.node_name,
            peer = ?peer,
            "Receiving heartbeats from the peer while active; both nodes may be active"
        );
    }
}
