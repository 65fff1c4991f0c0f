//! HTTP surface: heartbeat receiver, health checks, Prometheus metrics and
//! read-only status for operators

use crate::clock::Clock;
use crate::controller::FailoverController;
use crate::health::{ComponentStatus, HealthRegistry};
use crate::heartbeat::{HeartbeatRecord, HEARTBEAT_PATH};
use crate::models::{ContainerState, DecisionReason, FailoverDecision, NodeName, NodeRole};
use crate::monitor::ContainerHealthMonitor;
use anyhow::Context;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub heartbeat: Arc<HeartbeatRecord>,
    pub monitor: Arc<ContainerHealthMonitor>,
    pub controller: Arc<FailoverController>,
    pub clock: Arc<dyn Clock>,
}

/// Heartbeat freshness as seen by this node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatView {
    pub fresh: bool,
    pub age_secs: Option<f64>,
    pub timeout_secs: f64,
    pub received: u64,
    pub rejected: u64,
    pub last_peer: Option<String>,
}

/// Latest observation of one container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerView {
    pub name: String,
    pub state: ContainerState,
    pub down_for_secs: Option<f64>,
    pub observed_secs_ago: Option<f64>,
    pub last_error: Option<String>,
}

/// A recorded role decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionView {
    pub role: NodeRole,
    pub reason: DecisionReason,
    pub recorded_at: DateTime<Utc>,
    pub age_secs: f64,
}

impl DecisionView {
    fn from_decision(decision: &FailoverDecision, now: Instant) -> Self {
        Self {
            role: decision.role,
            reason: decision.reason,
            recorded_at: decision.recorded_at,
            age_secs: now.saturating_duration_since(decision.at).as_secs_f64(),
        }
    }
}

/// Response of `GET /status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub node: NodeName,
    pub role: NodeRole,
    pub intended_role: NodeRole,
    pub engaged: bool,
    pub split_brain_suspected: bool,
    pub local_health: String,
    pub heartbeat: HeartbeatView,
    pub containers: Vec<ContainerView>,
    pub last_decision: Option<DecisionView>,
}

/// Response of `GET /history`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub node: NodeName,
    pub decisions: Vec<DecisionView>,
}

/// Inbound heartbeat from the peer
async fn receive_heartbeat(State(state): State<Arc<AppState>>, body: Bytes) -> impl IntoResponse {
    match state.heartbeat.receive(&body).await {
        Ok(request) => (
            StatusCode::OK,
            Json(json!({ "message": "Heartbeat received", "server": request.server })),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

/// Health check response - returns 200 if healthy or degraded, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 once the role is engaged
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Role, freshness and container observations
async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(build_status(&state).await)
}

/// Recorded role decisions, oldest first
async fn history(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let now = state.clock.now();
    let decisions = state
        .controller
        .history()
        .await
        .iter()
        .map(|d| DecisionView::from_decision(d, now))
        .collect();

    Json(HistoryResponse {
        node: state.controller.config().node,
        decisions,
    })
}

pub async fn build_status(state: &AppState) -> StatusResponse {
    let now = state.clock.now();
    let controller = state.controller.status().await;
    let stats = state.heartbeat.stats().await;

    let heartbeat = HeartbeatView {
        fresh: state.heartbeat.is_fresh(now).await,
        age_secs: stats
            .last_received_at
            .map(|at| now.saturating_duration_since(at).as_secs_f64()),
        timeout_secs: state.heartbeat.timeout().as_secs_f64(),
        received: stats.received,
        rejected: stats.rejected,
        last_peer: stats.last_peer,
    };

    let containers = state
        .monitor
        .snapshot()
        .await
        .into_iter()
        .map(|o| ContainerView {
            name: o.name,
            state: o.state,
            down_for_secs: o
                .down_since
                .map(|since| now.saturating_duration_since(since).as_secs_f64()),
            observed_secs_ago: o
                .observed_at
                .map(|at| now.saturating_duration_since(at).as_secs_f64()),
            last_error: o.last_error,
        })
        .collect();

    StatusResponse {
        node: controller.node,
        role: controller.role,
        intended_role: controller.intended_role,
        engaged: controller.engaged,
        split_brain_suspected: controller.split_brain_suspected,
        local_health: state.monitor.local_health(now).await.label().to_string(),
        heartbeat,
        containers,
        last_decision: controller
            .last_decision
            .as_ref()
            .map(|d| DecisionView::from_decision(d, now)),
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(HEARTBEAT_PATH, post(receive_heartbeat))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .route("/history", get(history))
        .with_state(state)
}

/// Bind the API listener on all interfaces
pub async fn bind(port: u16) -> anyhow::Result<TcpListener> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding API listener on {}", addr))?;
    Ok(listener)
}

/// Serve the API on a bound listener; returns once shutdown is signalled and
/// in-flight requests have drained
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    info!(addr = %listener.local_addr()?, "Starting API server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    info!("API server stopped");
    Ok(())
}
