//! Heartbeat channel between the two peers
//!
//! The active node POSTs `{"server": "<name>"}` to `<peer>/heartbeat` on a
//! fixed interval. The receiving side records the arrival time of every
//! well-formed request; freshness is judged only against the local monotonic
//! clock, never against the sender's time.

use crate::clock::Clock;
use crate::error::{FailoverError, Result};
use crate::health::{components, HealthRegistry};
use crate::models::{NodeName, NodeRole};
use crate::observability::FailoverMetrics;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use url::Url;

/// Path the heartbeat receiver is mounted on
pub const HEARTBEAT_PATH: &str = "/heartbeat";

/// Configuration for both sides of the heartbeat channel
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Base URL of the peer agent
    pub endpoint: String,
    /// How often the active node sends a heartbeat
    pub interval: Duration,
    /// A heartbeat older than this is stale
    pub timeout: Duration,
    /// Upper bound for a single outbound request
    pub send_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000".to_string(),
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(20),
            send_timeout: Duration::from_secs(3),
        }
    }
}

/// Body of a heartbeat request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    /// Name of the sending node
    pub server: String,
}

impl HeartbeatRequest {
    /// Parse and validate a raw request body
    pub fn parse(body: &[u8], own_name: &str) -> Result<Self> {
        let request: HeartbeatRequest = serde_json::from_slice(body)
            .map_err(|e| FailoverError::HeartbeatMalformed(e.to_string()))?;

        let server = request.server.trim();
        if server.is_empty() {
            return Err(FailoverError::HeartbeatMalformed(
                "server name required".to_string(),
            ));
        }
        if server == own_name {
            return Err(FailoverError::HeartbeatMalformed(format!(
                "heartbeat claims to come from this node ({})",
                own_name
            )));
        }
        Ok(request)
    }
}

/// Counters and timestamps kept by the receiving side
#[derive(Debug, Clone, Default)]
pub struct HeartbeatStats {
    pub last_received_at: Option<Instant>,
    pub last_peer: Option<String>,
    pub received: u64,
    pub rejected: u64,
}

/// Receiving side of the heartbeat channel
pub struct HeartbeatRecord {
    own_name: String,
    timeout: Duration,
    clock: Arc<dyn Clock>,
    state: RwLock<HeartbeatStats>,
    metrics: FailoverMetrics,
}

impl HeartbeatRecord {
    pub fn new(own_name: impl Into<String>, timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            own_name: own_name.into(),
            timeout,
            clock,
            state: RwLock::new(HeartbeatStats::default()),
            metrics: FailoverMetrics::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Handle an inbound heartbeat body. Only a valid request refreshes the record.
    pub async fn receive(&self, body: &[u8]) -> Result<HeartbeatRequest> {
        match HeartbeatRequest::parse(body, &self.own_name) {
            Ok(request) => {
                let now = self.clock.now();
                let mut state = self.state.write().await;
                state.last_received_at = Some(now);
                state.last_peer = Some(request.server.clone());
                state.received += 1;
                drop(state);

                self.metrics.inc_heartbeats_received();
                debug!(peer = %request.server, "Heartbeat received");
                Ok(request)
            }
            Err(e) => {
                self.state.write().await.rejected += 1;
                self.metrics.inc_heartbeats_rejected();
                warn!(error = %e, kind = e.kind(), "Rejected heartbeat request");
                Err(e)
            }
        }
    }

    pub async fn last_received_at(&self) -> Option<Instant> {
        self.state.read().await.last_received_at
    }

    /// True iff a heartbeat arrived less than `timeout` before `now`
    pub async fn is_fresh(&self, now: Instant) -> bool {
        match self.last_received_at().await {
            Some(at) => now.saturating_duration_since(at) < self.timeout,
            None => false,
        }
    }

    /// Time since the last heartbeat, `None` if none ever arrived
    pub async fn age(&self, now: Instant) -> Option<Duration> {
        self.last_received_at()
            .await
            .map(|at| now.saturating_duration_since(at))
    }

    pub async fn stats(&self) -> HeartbeatStats {
        self.state.read().await.clone()
    }
}

/// Sending side of the heartbeat channel
///
/// Sends only while the published role is active. Failures are counted and
/// logged; they never change the role.
pub struct HeartbeatSender {
    client: reqwest::Client,
    url: Url,
    request: HeartbeatRequest,
    config: HeartbeatConfig,
    role: watch::Receiver<NodeRole>,
    sent: AtomicU64,
    failed: AtomicU64,
    consecutive_failures: AtomicU64,
    metrics: FailoverMetrics,
}

impl HeartbeatSender {
    pub fn new(
        node: NodeName,
        config: HeartbeatConfig,
        role: watch::Receiver<NodeRole>,
    ) -> Result<Self> {
        let url = heartbeat_url(&config.endpoint)?;
        let client = reqwest::Client::builder()
            .timeout(config.send_timeout)
            .connect_timeout(config.send_timeout)
            .build()
            .map_err(|e| FailoverError::ConfigInvalid(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url,
            request: HeartbeatRequest {
                server: node.as_str().to_string(),
            },
            config,
            role,
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            metrics: FailoverMetrics::new(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Send one heartbeat to the peer
    pub async fn send_once(&self) -> Result<()> {
        let outcome = self
            .client
            .post(self.url.clone())
            .json(&self.request)
            .send()
            .await
            .map_err(|e| e.to_string())
            .and_then(|response| {
                if response.status().is_success() {
                    Ok(())
                } else {
                    Err(format!("peer answered {}", response.status()))
                }
            });

        match outcome {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                self.metrics.inc_heartbeats_sent();
                if self.consecutive_failures.swap(0, Ordering::Relaxed) > 0 {
                    info!(url = %self.url, "Peer reachable again");
                }
                Ok(())
            }
            Err(reason) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
                self.metrics.inc_heartbeats_failed();
                Err(FailoverError::HeartbeatSendFailed {
                    endpoint: self.url.to_string(),
                    reason,
                })
            }
        }
    }

    /// Send a heartbeat if this node currently holds the active role.
    /// Returns `None` when passive.
    pub async fn send_if_active(&self) -> Option<Result<()>> {
        let role = *self.role.borrow();
        if role != NodeRole::Active {
            return None;
        }
        Some(self.send_once().await)
    }

    /// Run the send loop until shutdown
    pub async fn run(self: Arc<Self>, health: HealthRegistry, mut shutdown: broadcast::Receiver<()>) {
        info!(
            url = %self.url,
            interval_secs = self.config.interval.as_secs(),
            "Starting heartbeat sender"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.send_if_active().await {
                        Some(Ok(())) => health.set_healthy(components::HEARTBEAT_SENDER).await,
                        Some(Err(e)) => {
                            warn!(
                                error = %e,
                                kind = e.kind(),
                                consecutive_failures = self.consecutive_failures.load(Ordering::Relaxed),
                                "Failed to send heartbeat"
                            );
                            health
                                .set_degraded(components::HEARTBEAT_SENDER, e.to_string())
                                .await;
                        }
                        None => {
                            debug!("Passive, not sending heartbeat");
                            health.set_healthy(components::HEARTBEAT_SENDER).await;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!(
                        sent = self.sent_count(),
                        failed = self.failed_count(),
                        "Shutting down heartbeat sender"
                    );
                    break;
                }
            }
        }
    }
}

/// Build `<endpoint>/heartbeat` from the peer base URL
pub fn heartbeat_url(endpoint: &str) -> Result<Url> {
    let base = Url::parse(endpoint)
        .map_err(|e| FailoverError::ConfigInvalid(format!("endpoint '{}': {}", endpoint, e)))?;
    if !matches!(base.scheme(), "http" | "https") {
        return Err(FailoverError::ConfigInvalid(format!(
            "endpoint '{}' must use http or https",
            endpoint
        )));
    }
    if base.host_str().is_none() {
        return Err(FailoverError::ConfigInvalid(format!(
            "endpoint '{}' has no host",
            endpoint
        )));
    }
    base.join(HEARTBEAT_PATH)
        .map_err(|e| FailoverError::ConfigInvalid(format!("endpoint '{}': {}", endpoint, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn record(clock: &ManualClock, timeout_secs: u64) -> HeartbeatRecord {
        HeartbeatRecord::new(
            "server2",
            Duration::from_secs(timeout_secs),
            Arc::new(clock.clone()),
        )
    }

    fn sender(endpoint: String, role: NodeRole) -> (HeartbeatSender, watch::Sender<NodeRole>) {
        let (tx, rx) = watch::channel(role);
        let config = HeartbeatConfig {
            endpoint,
            send_timeout: Duration::from_millis(500),
            ..HeartbeatConfig::default()
        };
        (HeartbeatSender::new(NodeName::Server1, config, rx).unwrap(), tx)
    }

    #[test]
    fn test_parse_accepts_peer_heartbeat() {
        let request = HeartbeatRequest::parse(br#"{"server":"server1"}"#, "server2").unwrap();
        assert_eq!(request.server, "server1");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        let bodies: [&[u8]; 5] = [
            b"not json",
            br#"{}"#,
            br#"{"server":""}"#,
            br#"{"server":42}"#,
            br#"{"server":"server2"}"#,
        ];
        for body in bodies {
            let err = HeartbeatRequest::parse(body, "server2").unwrap_err();
            assert_eq!(err.kind(), "heartbeat_malformed");
        }
    }

    #[tokio::test]
    async fn test_not_fresh_before_first_heartbeat() {
        let clock = ManualClock::new();
        let record = record(&clock, 10);
        assert!(!record.is_fresh(clock.now()).await);
        assert_eq!(record.age(clock.now()).await, None);
    }

    #[tokio::test]
    async fn test_freshness_window_is_exclusive() {
        let clock = ManualClock::new();
        let record = record(&clock, 12);

        record.receive(br#"{"server":"server1"}"#).await.unwrap();
        let received = clock.now();

        assert!(record.is_fresh(received + Duration::from_millis(11_999)).await);
        assert!(!record.is_fresh(received + Duration::from_secs(12)).await);
    }

    #[tokio::test]
    async fn test_malformed_does_not_refresh() {
        let clock = ManualClock::new();
        let record = record(&clock, 10);

        record.receive(br#"{"server":"server1"}"#).await.unwrap();
        let first = record.last_received_at().await;

        clock.advance(Duration::from_secs(5));
        assert!(record.receive(br#"{"srv":"server1"}"#).await.is_err());

        assert_eq!(record.last_received_at().await, first);
        let stats = record.stats().await;
        assert_eq!(stats.received, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.last_peer.as_deref(), Some("server1"));
    }

    #[test]
    fn test_heartbeat_url() {
        assert_eq!(
            heartbeat_url("http://172.17.92.9:8000").unwrap().as_str(),
            "http://172.17.92.9:8000/heartbeat"
        );
        assert!(heartbeat_url("172.17.92.9:8000").is_err());
        assert!(heartbeat_url("ftp://peer").is_err());
    }

    #[tokio::test]
    async fn test_send_once_posts_node_name() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/heartbeat")
            .match_body(mockito::Matcher::Json(json!({ "server": "server1" })))
            .with_status(200)
            .with_body(r#"{"message":"Heartbeat received"}"#)
            .expect(1)
            .create_async()
            .await;

        let (sender, _role) = sender(server.url(), NodeRole::Active);
        sender.send_once().await.unwrap();

        mock.assert_async().await;
        assert_eq!(sender.sent_count(), 1);
        assert_eq!(sender.failed_count(), 0);
    }

    #[tokio::test]
    async fn test_non_success_counts_as_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/heartbeat")
            .with_status(503)
            .create_async()
            .await;

        let (sender, _role) = sender(server.url(), NodeRole::Active);
        let err = sender.send_once().await.unwrap_err();

        assert_eq!(err.kind(), "heartbeat_send_failed");
        assert_eq!(sender.failed_count(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_peer_counts_as_failure() {
        // Port 9 (discard) is not listening on test hosts
        let (sender, _role) = sender("http://127.0.0.1:9".to_string(), NodeRole::Active);
        assert!(sender.send_once().await.is_err());
        assert_eq!(sender.failed_count(), 1);
    }

    #[tokio::test]
    async fn test_passive_node_stays_silent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/heartbeat")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let (sender, role) = sender(server.url(), NodeRole::Passive);
        assert!(sender.send_if_active().await.is_none());

        role.send_replace(NodeRole::Active);
        assert!(matches!(sender.send_if_active().await, Some(Ok(()))));

        mock.assert_async().await;
    }
}
