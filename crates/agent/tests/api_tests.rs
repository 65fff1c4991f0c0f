//! Integration tests for the agent API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use failover_lib::{
    api::{self, create_router, AppState},
    clock::{Clock, ManualClock},
    health::{components, HealthRegistry},
    runtime::InMemoryRuntime,
    ContainerHealthMonitor, ContainerSpec, ContainerState, ControllerConfig, FailoverController,
    HeartbeatRecord, MonitorConfig, NodeName, StructuredLogger,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tower::ServiceExt;

const CONTAINERS: [&str; 2] = ["container-1", "container-2"];

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    clock: ManualClock,
    runtime: Arc<InMemoryRuntime>,
}

async fn setup_test_app(node: NodeName) -> TestApp {
    let clock = ManualClock::new();
    let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
    let runtime = Arc::new(InMemoryRuntime::with_containers(
        CONTAINERS,
        ContainerState::Running,
    ));
    let logger = StructuredLogger::new(node.as_str());

    let health_registry = HealthRegistry::new();
    health_registry.register(components::MONITOR).await;
    health_registry.register(components::HEARTBEAT_SENDER).await;
    health_registry.register(components::CONTROLLER).await;

    let monitor = Arc::new(ContainerHealthMonitor::new(
        CONTAINERS.iter().map(|n| ContainerSpec::new(*n)).collect(),
        runtime.clone(),
        shared_clock.clone(),
        MonitorConfig::default(),
        logger.clone(),
    ));
    let heartbeat = Arc::new(HeartbeatRecord::new(
        node.as_str(),
        Duration::from_secs(20),
        shared_clock.clone(),
    ));
    let controller = Arc::new(FailoverController::new(
        ControllerConfig {
            node,
            reconcile_interval: None,
            ..ControllerConfig::default()
        },
        monitor.clone(),
        heartbeat.clone(),
        runtime.clone(),
        shared_clock.clone(),
        logger,
    ));

    let state = Arc::new(AppState {
        health_registry,
        heartbeat,
        monitor,
        controller,
        clock: shared_clock,
    });
    let router = create_router(state.clone());

    TestApp {
        router,
        state,
        clock,
        runtime,
    }
}

async fn get(app: &TestApp, uri: &str) -> (StatusCode, Value) {
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post_heartbeat(app: &TestApp, body: &str) -> (StatusCode, Value) {
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/heartbeat")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let app = setup_test_app(NodeName::Server1).await;

    let (status, health) = get(&app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_returns_ok_when_degraded() {
    let app = setup_test_app(NodeName::Server1).await;
    app.state
        .health_registry
        .set_degraded(components::MONITOR, "1 runtime status calls failed")
        .await;

    let (status, health) = get(&app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let app = setup_test_app(NodeName::Server1).await;
    app.state
        .health_registry
        .set_unhealthy(components::CONTROLLER, "tick failed")
        .await;

    let (status, health) = get(&app, "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_readyz_waits_for_engagement() {
    let app = setup_test_app(NodeName::Server1).await;

    let (status, readiness) = get(&app, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(readiness["ready"], false);
    assert_eq!(readiness["reason"], "Startup grace period in progress");

    app.state.health_registry.set_ready(true).await;

    let (status, readiness) = get(&app, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(readiness["ready"], true);
}

#[tokio::test]
async fn test_heartbeat_from_peer_is_accepted() {
    let app = setup_test_app(NodeName::Server2).await;

    let (status, body) = post_heartbeat(&app, r#"{"server": "server1"}"#).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Heartbeat received");

    let now = app.clock.now();
    assert!(app.state.heartbeat.is_fresh(now).await);

    let (_, status_body) = get(&app, "/status").await;
    assert_eq!(status_body["heartbeat"]["fresh"], true);
    assert_eq!(status_body["heartbeat"]["received"], 1);
    assert_eq!(status_body["heartbeat"]["last_peer"], "server1");
}

#[tokio::test]
async fn test_malformed_heartbeats_are_rejected() {
    let app = setup_test_app(NodeName::Server2).await;

    for body in [
        "not json",
        r#"{}"#,
        r#"{"server": ""}"#,
        r#"{"server": "server2"}"#,
    ] {
        let (status, response) = post_heartbeat(&app, body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body {:?}", body);
        assert!(response["error"].is_string());
    }

    let now = app.clock.now();
    assert!(!app.state.heartbeat.is_fresh(now).await);
    assert_eq!(app.state.heartbeat.stats().await.rejected, 4);
}

#[tokio::test]
async fn test_heartbeat_goes_stale_after_timeout() {
    let app = setup_test_app(NodeName::Server2).await;
    post_heartbeat(&app, r#"{"server": "server1"}"#).await;

    app.clock.advance(Duration::from_secs(20));

    let (_, body) = get(&app, "/status").await;
    assert_eq!(body["heartbeat"]["fresh"], false);
    assert_eq!(body["heartbeat"]["age_secs"], 20.0);
}

#[tokio::test]
async fn test_status_reports_intended_role_before_engagement() {
    let app = setup_test_app(NodeName::Server2).await;

    let (status, body) = get(&app, "/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["node"], "server2");
    assert_eq!(body["role"], "passive");
    assert_eq!(body["intended_role"], "passive");
    assert_eq!(body["engaged"], false);
    assert!(body["last_decision"].is_null());

    let containers = body["containers"].as_array().unwrap();
    assert_eq!(containers.len(), 2);
    assert_eq!(containers[0]["name"], "container-1");
    assert_eq!(containers[0]["state"], "unknown");
}

#[tokio::test]
async fn test_status_reflects_container_observations() {
    let app = setup_test_app(NodeName::Server1).await;
    app.runtime.set_state("container-2", ContainerState::Stopped);

    app.state.monitor.tick().await;
    app.clock.advance(Duration::from_secs(4));

    let (_, body) = get(&app, "/status").await;
    let containers = body["containers"].as_array().unwrap();

    assert_eq!(containers[0]["state"], "running");
    assert!(containers[0]["down_for_secs"].is_null());
    assert_eq!(containers[1]["state"], "stopped");
    assert_eq!(containers[1]["down_for_secs"], 4.0);
    assert_eq!(containers[1]["observed_secs_ago"], 4.0);
}

#[tokio::test]
async fn test_history_lists_decisions_after_engagement() {
    let app = setup_test_app(NodeName::Server1).await;

    let (_, body) = get(&app, "/history").await;
    assert_eq!(body["node"], "server1");
    assert!(body["decisions"].as_array().unwrap().is_empty());

    app.state.monitor.tick().await;
    app.clock.advance(ControllerConfig::default().startup_grace_period);
    let decision = app.state.controller.tick().await.unwrap();
    assert_eq!(decision.reason.as_str(), "startup");

    let (_, body) = get(&app, "/history").await;
    let decisions = body["decisions"].as_array().unwrap();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0]["role"], "active");
    assert_eq!(decisions[0]["reason"], "startup");

    let (_, status) = get(&app, "/status").await;
    assert_eq!(status["engaged"], true);
    assert_eq!(status["last_decision"]["reason"], "startup");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup_test_app(NodeName::Server1).await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("failover_agent_role_active"));
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let app = setup_test_app(NodeName::Server1).await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/become_primary")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bind_fails_when_port_is_taken() {
    let taken = api::bind(0).await.unwrap();
    let port = taken.local_addr().unwrap().port();

    let err = api::bind(port).await.unwrap_err();

    assert!(err.to_string().contains(&port.to_string()));
}

#[tokio::test]
async fn test_serve_answers_on_bound_listener_until_shutdown() {
    let app = setup_test_app(NodeName::Server1).await;
    let listener = api::bind(0).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

    let server = tokio::spawn(api::serve(listener, app.state.clone(), shutdown_rx));

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream
        .write_all(b"GET /healthz HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"), "got: {}", response);

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not stop on shutdown")
        .unwrap()
        .unwrap();

    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
}
