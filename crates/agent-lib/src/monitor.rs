//! Container health monitoring
//!
//! Polls the runtime for every managed container and keeps one
//! [`ContainerObservation`] per container. The controller reads consistent
//! snapshots; only this module writes observations.

use crate::clock::Clock;
use crate::error::Result;
use crate::health::{components, HealthRegistry};
use crate::models::{ContainerObservation, ContainerSpec, ContainerState, LocalHealth};
use crate::observability::{FailoverMetrics, StructuredLogger};
use crate::runtime::{call_with_timeout, ContainerRuntime};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Configuration for the health monitor
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// How often the runtime is polled
    pub poll_interval: Duration,
    /// How long a container may stay down before it counts for failover
    pub restart_grace_period: Duration,
    /// No container counts as down until the process is this old
    pub startup_grace_period: Duration,
    /// Upper bound for a single status call
    pub call_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            restart_grace_period: Duration::from_secs(30),
            startup_grace_period: Duration::from_secs(20),
            call_timeout: Duration::from_secs(5),
        }
    }
}

/// Outcome of one poll over all containers
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollSummary {
    pub running: usize,
    pub down: usize,
    pub errors: usize,
}

/// A state change detected while applying a status result
#[derive(Debug, Clone, PartialEq, Eq)]
struct Transition {
    container: String,
    previous: ContainerState,
    current: ContainerState,
    error: Option<String>,
}

/// Maintains a fresh observation for every managed container
pub struct ContainerHealthMonitor {
    containers: Vec<ContainerSpec>,
    runtime: Arc<dyn ContainerRuntime>,
    clock: Arc<dyn Clock>,
    config: MonitorConfig,
    observations: RwLock<Vec<ContainerObservation>>,
    started_at: Instant,
    metrics: FailoverMetrics,
    logger: StructuredLogger,
}

impl ContainerHealthMonitor {
    pub fn new(
        containers: Vec<ContainerSpec>,
        runtime: Arc<dyn ContainerRuntime>,
        clock: Arc<dyn Clock>,
        config: MonitorConfig,
        logger: StructuredLogger,
    ) -> Self {
        let observations = containers
            .iter()
            .map(ContainerObservation::unobserved)
            .collect();
        let started_at = clock.now();

        Self {
            containers,
            runtime,
            clock,
            config,
            observations: RwLock::new(observations),
            started_at,
            metrics: FailoverMetrics::new(),
            logger,
        }
    }

    /// Instant the process (and its startup grace period) started
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn containers(&self) -> &[ContainerSpec] {
        &self.containers
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Poll every container once and update its observation
    pub async fn tick(&self) -> PollSummary {
        let poll_start = std::time::Instant::now();

        // Query outside the lock so readers never wait on the runtime
        let mut results = Vec::with_capacity(self.containers.len());
        for spec in &self.containers {
            let result = call_with_timeout(
                &spec.name,
                self.config.call_timeout,
                self.runtime.status(&spec.name),
            )
            .await;
            results.push(result);
        }

        let now = self.clock.now();
        let mut summary = PollSummary::default();
        let mut transitions = Vec::new();
        {
            let mut observations = self.observations.write().await;
            for (observation, result) in observations.iter_mut().zip(results) {
                if result.is_err() {
                    summary.errors += 1;
                    self.metrics.inc_runtime_errors("status");
                }
                if let Some(transition) = apply_status(observation, result, now) {
                    transitions.push(transition);
                }
                if observation.state.is_running() {
                    summary.running += 1;
                } else {
                    summary.down += 1;
                }
                self.metrics
                    .set_container_up(&observation.name, observation.state.is_running());
            }
        }

        for t in &transitions {
            self.logger
                .log_container_state(&t.container, t.previous, t.current, t.error.as_deref());
        }

        self.metrics
            .observe_poll_latency(poll_start.elapsed().as_secs_f64());
        summary
    }

    /// Point-in-time copy of all observations
    pub async fn snapshot(&self) -> Vec<ContainerObservation> {
        self.observations.read().await.clone()
    }

    /// Rolled-up health of all managed containers
    pub async fn local_health(&self, now: Instant) -> LocalHealth {
        let observations = self.observations.read().await;
        rollup(&observations, now, self.config.restart_grace_period)
    }

    /// True when local containers have been down long enough to act on
    pub async fn grace_eligible_down(&self, now: Instant) -> bool {
        if now.saturating_duration_since(self.started_at) < self.config.startup_grace_period {
            return false;
        }
        matches!(self.local_health(now).await, LocalHealth::DownSince(_))
    }

    /// Restart the down clock of every container that is not running
    pub async fn rearm(&self, now: Instant) {
        let mut observations = self.observations.write().await;
        for observation in observations.iter_mut() {
            if !observation.state.is_running() {
                observation.down_since = Some(now);
            }
        }
        debug!("Restarted down clock for containers not running");
    }

    /// Run the polling loop until shutdown
    pub async fn run(self: Arc<Self>, health: HealthRegistry, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.poll_interval.as_secs(),
            containers = self.containers.len(),
            "Starting container health monitor"
        );

        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_label = "unknown";

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let summary = self.tick().await;

                    if summary.errors > 0 {
                        health
                            .set_degraded(
                                components::MONITOR,
                                format!("{} runtime status calls failed", summary.errors),
                            )
                            .await;
                    } else {
                        health.set_healthy(components::MONITOR).await;
                    }

                    let label = self.local_health(self.clock.now()).await.label();
                    if label != last_label {
                        self.logger.log_health_change(last_label, label);
                        last_label = label;
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down container health monitor");
                    break;
                }
            }
        }
    }
}

/// Fold one status result into an observation, returning a state change if any
fn apply_status(
    observation: &mut ContainerObservation,
    result: Result<ContainerState>,
    now: Instant,
) -> Option<Transition> {
    let previous = observation.state;
    let (current, error) = match result {
        Ok(state) => (state, None),
        Err(e) => (ContainerState::Unknown, Some(e.to_string())),
    };

    if current.is_running() {
        observation.down_since = None;
    } else if previous.is_running() || observation.down_since.is_none() {
        observation.down_since = Some(now);
    }

    observation.state = current;
    observation.observed_at = Some(now);
    let error_changed = error.is_some() && observation.last_error != error;
    observation.last_error = error.clone();

    if previous != current || error_changed {
        Some(Transition {
            container: observation.name.clone(),
            previous,
            current,
            error,
        })
    } else {
        None
    }
}

/// Roll up observations: down beats degraded beats healthy
fn rollup(observations: &[ContainerObservation], now: Instant, grace: Duration) -> LocalHealth {
    let mut degraded_since: Option<Instant> = None;
    let mut down_since: Option<Instant> = None;

    for observation in observations.iter().filter(|o| !o.state.is_running()) {
        let Some(since) = observation.down_since else {
            continue;
        };
        if now.saturating_duration_since(since) >= grace {
            down_since = Some(down_since.map_or(since, |d| d.min(since)));
        } else {
            degraded_since = Some(degraded_since.map_or(since, |d| d.min(since)));
        }
    }

    match (down_since, degraded_since) {
        (Some(since), _) => LocalHealth::DownSince(since),
        (None, Some(since)) => LocalHealth::DegradedSince(since),
        (None, None) => LocalHealth::Healthy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::FailoverError;
    use crate::runtime::InMemoryRuntime;

    fn observation(name: &str) -> ContainerObservation {
        ContainerObservation::unobserved(&ContainerSpec::new(name))
    }

    fn monitor_with(
        runtime: Arc<InMemoryRuntime>,
        clock: &ManualClock,
        names: &[&str],
    ) -> ContainerHealthMonitor {
        let config = MonitorConfig {
            restart_grace_period: Duration::from_secs(15),
            startup_grace_period: Duration::from_secs(30),
            ..MonitorConfig::default()
        };
        ContainerHealthMonitor::new(
            names.iter().map(|n| ContainerSpec::new(*n)).collect(),
            runtime,
            Arc::new(clock.clone()),
            config,
            StructuredLogger::new("test-node"),
        )
    }

    #[test]
    fn test_down_since_set_once_per_outage() {
        let mut obs = observation("web");
        let t0 = Instant::now();

        apply_status(&mut obs, Ok(ContainerState::Running), t0);
        assert_eq!(obs.down_since, None);

        let t1 = t0 + Duration::from_secs(1);
        apply_status(&mut obs, Ok(ContainerState::Stopped), t1);
        assert_eq!(obs.down_since, Some(t1));

        // Still down: the outage keeps its original start
        let t2 = t0 + Duration::from_secs(2);
        apply_status(&mut obs, Ok(ContainerState::Stopped), t2);
        let t3 = t0 + Duration::from_secs(3);
        apply_status(&mut obs, Err(FailoverError::runtime("web", "refused")), t3);
        assert_eq!(obs.down_since, Some(t1));
        assert_eq!(obs.observed_at, Some(t3));
        assert!(obs.last_error.is_some());

        // Recovery clears it, the next outage starts a new clock
        let t4 = t0 + Duration::from_secs(4);
        apply_status(&mut obs, Ok(ContainerState::Running), t4);
        assert_eq!(obs.down_since, None);
        assert_eq!(obs.last_error, None);

        let t5 = t0 + Duration::from_secs(5);
        apply_status(&mut obs, Ok(ContainerState::Stopped), t5);
        assert_eq!(obs.down_since, Some(t5));
    }

    #[test]
    fn test_never_running_counts_from_first_observation() {
        let mut obs = observation("web");
        let t0 = Instant::now();

        apply_status(&mut obs, Ok(ContainerState::Stopped), t0);
        assert_eq!(obs.down_since, Some(t0));

        apply_status(&mut obs, Ok(ContainerState::Unknown), t0 + Duration::from_secs(1));
        assert_eq!(obs.down_since, Some(t0));
    }

    #[test]
    fn test_transition_reported_only_on_change() {
        let mut obs = observation("web");
        let t0 = Instant::now();

        assert!(apply_status(&mut obs, Ok(ContainerState::Running), t0).is_some());
        assert!(apply_status(&mut obs, Ok(ContainerState::Running), t0).is_none());

        let transition = apply_status(&mut obs, Ok(ContainerState::Stopped), t0).unwrap();
        assert_eq!(transition.previous, ContainerState::Running);
        assert_eq!(transition.current, ContainerState::Stopped);
    }

    #[test]
    fn test_rollup_prefers_down_and_earliest() {
        let t0 = Instant::now();
        let grace = Duration::from_secs(15);
        let now = t0 + Duration::from_secs(20);

        let mut a = observation("a");
        a.state = ContainerState::Stopped;
        a.down_since = Some(t0 + Duration::from_secs(10));
        let mut b = observation("b");
        b.state = ContainerState::Running;

        assert_eq!(
            rollup(&[a.clone(), b.clone()], now, grace),
            LocalHealth::DegradedSince(t0 + Duration::from_secs(10))
        );

        let mut c = observation("c");
        c.state = ContainerState::Unknown;
        c.down_since = Some(t0 + Duration::from_secs(2));
        let mut d = observation("d");
        d.state = ContainerState::Stopped;
        d.down_since = Some(t0);

        assert_eq!(
            rollup(&[a, b, c, d], now, grace),
            LocalHealth::DownSince(t0)
        );
        assert_eq!(rollup(&[], now, grace), LocalHealth::Healthy);
    }

    #[tokio::test]
    async fn test_tick_counts_errors_as_down() {
        let runtime = Arc::new(InMemoryRuntime::with_containers(
            ["web", "db"],
            ContainerState::Running,
        ));
        runtime.set_unreachable("db", true);
        let clock = ManualClock::new();
        let monitor = monitor_with(runtime, &clock, &["web", "db"]);

        let summary = monitor.tick().await;
        assert_eq!(
            summary,
            PollSummary {
                running: 1,
                down: 1,
                errors: 1
            }
        );

        let snapshot = monitor.snapshot().await;
        assert_eq!(snapshot[0].state, ContainerState::Running);
        assert_eq!(snapshot[1].state, ContainerState::Unknown);
        assert!(snapshot[1].down_since.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_times_out_hung_runtime() {
        let runtime = Arc::new(InMemoryRuntime::with_containers(
            ["web"],
            ContainerState::Running,
        ));
        runtime.set_delay(Some(Duration::from_secs(60)));
        let clock = ManualClock::new();
        let monitor = monitor_with(runtime, &clock, &["web"]);

        let summary = monitor.tick().await;
        assert_eq!(summary.errors, 1);
        let snapshot = monitor.snapshot().await;
        assert!(snapshot[0]
            .last_error
            .as_deref()
            .unwrap()
            .contains("timed out"));
    }

    #[tokio::test]
    async fn test_grace_eligible_down_respects_both_grace_periods() {
        let runtime = Arc::new(InMemoryRuntime::with_containers(
            ["web"],
            ContainerState::Stopped,
        ));
        let clock = ManualClock::new();
        let monitor = monitor_with(runtime, &clock, &["web"]);

        monitor.tick().await;

        // Restart grace exceeded, but still inside the startup grace period
        clock.advance(Duration::from_secs(20));
        monitor.tick().await;
        assert!(!monitor.grace_eligible_down(clock.now()).await);

        clock.advance(Duration::from_secs(10));
        monitor.tick().await;
        assert!(monitor.grace_eligible_down(clock.now()).await);
    }

    #[tokio::test]
    async fn test_rearm_restarts_down_clock() {
        let runtime = Arc::new(InMemoryRuntime::with_containers(
            ["web"],
            ContainerState::Stopped,
        ));
        let clock = ManualClock::new();
        let monitor = monitor_with(runtime, &clock, &["web"]);

        monitor.tick().await;
        clock.advance(Duration::from_secs(40));
        assert!(monitor.grace_eligible_down(clock.now()).await);

        monitor.rearm(clock.now()).await;
        assert!(!monitor.grace_eligible_down(clock.now()).await);
        assert!(matches!(
            monitor.local_health(clock.now()).await,
            LocalHealth::DegradedSince(_)
        ));
    }
}
