//! Failover decision engine
//!
//! The controller owns the node role. On every tick it reads the heartbeat
//! freshness and the rolled-up container health, decides ACTIVE or PASSIVE,
//! and issues start/stop commands only on the tick where the role changes.
//! Other components observe the role through a `watch` channel.
//!
//! Two nodes with no arbiter: during a full network partition both nodes
//! lose each other's heartbeats and both may become active.

use crate::clock::Clock;
use crate::health::{components, HealthRegistry};
use crate::heartbeat::HeartbeatRecord;
use crate::models::{ContainerState, DecisionReason, FailoverDecision, NodeName, NodeRole};
use crate::monitor::ContainerHealthMonitor;
use crate::observability::{FailoverMetrics, StructuredLogger};
use crate::runtime::{call_with_timeout, ContainerRuntime};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};


/// Decisions kept in memory for `/history`
pub const MAX_HISTORY: usize = 256;

/// Configuration for the failover controller
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Which peer this is; decides the intended starting role
    pub node: NodeName,
    /// Controller tick cadence, also the heartbeat check cadence
    pub check_interval: Duration,
    /// No lifecycle command is issued before the process is this old
    pub startup_grace_period: Duration,
    /// Re-assert container state at this cadence, `None` disables
    pub reconcile_interval: Option<Duration>,
    /// After a self-demotion, heartbeat loss is ignored for this long
    pub demotion_holddown: Duration,
    /// Upper bound for a single start/stop call
    pub call_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            node: NodeName::Server1,
            check_interval: Duration::from_secs(5),
            startup_grace_period: Duration::from_secs(20),
            reconcile_interval: Some(Duration::from_secs(30)),
            demotion_holddown: Duration::from_secs(40),
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Lifecycle commands issued in one batch
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleReport {
    pub succeeded: usize,
    pub failed: usize,
}

/// Read-only view of the controller for the HTTP surface
#[derive(Debug, Clone)]
pub struct ControllerStatus {
    pub node: NodeName,
    pub role: NodeRole,
    pub intended_role: NodeRole,
    pub engaged: bool,
    pub split_brain_suspected: bool,
    pub last_decision: Option<FailoverDecision>,
}

/// State only touched while a tick holds the lock
#[derive(Debug, Default)]
struct TickState {
    holddown_until: Option<Instant>,
    last_reconcile: Option<Instant>,
    last_fresh: Option<bool>,
    peer_fresh_since: Option<Instant>,
}

#[derive(Debug, Clone, Copy)]
enum Command {
    Start,
    Stop,
}

impl Command {
    fn as_str(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Stop => "stop",
        }
    }
}

/// Two-state failover controller
pub struct FailoverController {
    config: ControllerConfig,
    monitor: Arc<ContainerHealthMonitor>,
    heartbeat: Arc<HeartbeatRecord>,
    runtime: Arc<dyn ContainerRuntime>,
    clock: Arc<dyn Clock>,
    role_tx: watch::Sender<NodeRole>,
    engaged: AtomicBool,
    split_brain: AtomicBool,
    tick_state: Mutex<TickState>,
    history: RwLock<VecDeque<FailoverDecision>>,
    metrics: FailoverMetrics,
    logger: StructuredLogger,
}

impl FailoverController {
    pub fn new(
        config: ControllerConfig,
        monitor: Arc<ContainerHealthMonitor>,
        heartbeat: Arc<HeartbeatRecord>,
        runtime: Arc<dyn ContainerRuntime>,
        clock: Arc<dyn Clock>,
        logger: StructuredLogger,
    ) -> Self {
        let intended = config.node.initial_role();
        let (role_tx, _) = watch::channel(intended);
        let metrics = FailoverMetrics::new();
        metrics.set_role(intended);
        metrics.set_engaged(false);

        Self {
            config,
            monitor,
            heartbeat,
            runtime,
            clock,
            role_tx,
            engaged: AtomicBool::new(false),
            split_brain: AtomicBool::new(false),
            tick_state: Mutex::new(TickState::default()),
            history: RwLock::new(VecDeque::new()),
            metrics,
            logger,
        }
    }

    /// Current role (the intended role until the controller engages)
    pub fn role(&self) -> NodeRole {
        *self.role_tx.borrow()
    }

    /// Subscribe to role changes
    pub fn subscribe(&self) -> watch::Receiver<NodeRole> {
        self.role_tx.subscribe()
    }

    /// True once the startup grace period is over and the role is operative
    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// All recorded decisions, oldest first
    pub async fn history(&self) -> Vec<FailoverDecision> {
        self.history.read().await.iter().cloned().collect()
    }

    pub async fn status(&self) -> ControllerStatus {
        ControllerStatus {
            node: self.config.node,
            role: self.role(),
            intended_role: self.config.node.initial_role(),
            engaged: self.is_engaged(),
            split_brain_suspected: self.split_brain.load(Ordering::Acquire),
            last_decision: self.history.read().await.back().cloned(),
        }
    }

    fn in_startup_grace(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.monitor.started_at()) < self.config.startup_grace_period
    }

    /// Evaluate the transition rules once. Returns the decision taken, if any.
    pub async fn tick(&self) -> Option<FailoverDecision> {
        // Serialises ticks: at most one decision is in flight
        let mut state = self.tick_state.lock().await;
        let now = self.clock.now();
        let fresh = self.heartbeat.is_fresh(now).await;
        self.track_freshness(&mut state, fresh, now).await;

        if self.in_startup_grace(now) {
            debug!(
                remaining_secs = (self.config.startup_grace_period
                    - now.saturating_duration_since(self.monitor.started_at()))
                .as_secs(),
                "In startup grace period, not acting"
            );
            return None;
        }

        if !self.is_engaged() {
            let (role, reason) = engagement(self.config.node.initial_role(), fresh);
            return Some(self.transition(&mut state, role, reason, now).await);
        }

        let next = match self.role() {
            NodeRole::Passive => {
                let holding = state.holddown_until.is_some_and(|until| now < until);
                if !fresh && holding {
                    debug!("Peer heartbeat stale, holding down after self-demotion");
                }
                (!fresh && !holding).then_some((NodeRole::Active, DecisionReason::HeartbeatLost))
            }
            NodeRole::Active => {
                if self.monitor.grace_eligible_down(now).await {
                    Some((NodeRole::Passive, DecisionReason::LocalContainersDown))
                } else {
                    self.report_peer_active(&mut state, fresh, now).await;
                    None
                }
            }
        };

        match next {
            Some((role, reason)) => Some(self.transition(&mut state, role, reason, now).await),
            None => {
                self.reconcile(&mut state, now).await;
                None
            }
        }
    }

    async fn track_freshness(&self, state: &mut TickState, fresh: bool, now: Instant) {
        let age = self.heartbeat.age(now).await.map(|d| d.as_secs_f64());
        self.metrics.set_heartbeat_age(age);
        if state.last_fresh != Some(fresh) {
            // The first stale reading before any heartbeat is not news
            if state.last_fresh.is_some() || fresh {
                self.logger.log_heartbeat_freshness(fresh, age);
            }
            state.last_fresh = Some(fresh);
        }
    }

    /// A restarting peer heartbeats through its own startup grace before it
    /// engages and stands by, so only a peer that stays fresh longer than
    /// that window plus the heartbeat timeout counts as a second active node.
    async fn report_peer_active(&self, state: &mut TickState, fresh: bool, now: Instant) {
        if !fresh {
            state.peer_fresh_since = None;
            self.split_brain.store(false, Ordering::Release);
            return;
        }

        let since = *state.peer_fresh_since.get_or_insert(now);
        let window = self.config.startup_grace_period + self.heartbeat.timeout();
        if now.saturating_duration_since(since) < window {
            debug!(
                fresh_for_secs = now.saturating_duration_since(since).as_secs(),
                "Peer heartbeating while active, waiting for it to stand by"
            );
            return;
        }
        if !self.split_brain.swap(true, Ordering::AcqRel) {
            let peer = self.heartbeat.stats().await.last_peer;
            self.logger.log_split_brain_suspected(peer.as_deref());
        }
    }

    async fn transition(
        &self,
        state: &mut TickState,
        role: NodeRole,
        reason: DecisionReason,
        now: Instant,
    ) -> FailoverDecision {
        let previous = self.is_engaged().then(|| self.role());

        // Publish first: the heartbeat sender follows the role immediately
        self.role_tx.send_replace(role);
        self.engaged.store(true, Ordering::Release);
        self.split_brain.store(false, Ordering::Release);
        state.peer_fresh_since = None;

        let decision = FailoverDecision {
            role,
            reason,
            at: now,
            recorded_at: chrono::Utc::now(),
        };
        {
            let mut history = self.history.write().await;
            if history.len() == MAX_HISTORY {
                history.pop_front();
            }
            history.push_back(decision.clone());
        }

        self.logger.log_role_change(previous, role, reason);
        self.metrics.set_role(role);
        self.metrics.set_engaged(true);
        self.metrics.inc_role_transition(role, reason);

        match (role, reason) {
            (NodeRole::Active, _) => {
                state.holddown_until = None;
                let report = self.issue_all(Command::Start).await;
                info!(
                    started = report.succeeded,
                    failed = report.failed,
                    "Took over managed containers"
                );
                // Give the freshly started containers a full restart grace
                self.monitor.rearm(self.clock.now()).await;
            }
            (NodeRole::Passive, DecisionReason::LocalContainersDown) => {
                state.holddown_until = Some(now + self.config.demotion_holddown);
                let report = self.issue_all(Command::Stop).await;
                info!(
                    stopped = report.succeeded,
                    failed = report.failed,
                    holddown_secs = self.config.demotion_holddown.as_secs(),
                    "Demoted after local containers stayed down"
                );
            }
            (NodeRole::Passive, _) => {
                let running = self.containers_in(|s| s == ContainerState::Running).await;
                let report = self.issue(Command::Stop, &running).await;
                info!(
                    stopped = report.succeeded,
                    failed = report.failed,
                    "Standing by"
                );
            }
        }

        state.last_reconcile = Some(now);
        decision
    }

    /// Heal drift between the held role and the observed containers
    async fn reconcile(&self, state: &mut TickState, now: Instant) {
        let Some(every) = self.config.reconcile_interval else {
            return;
        };
        if state
            .last_reconcile
            .is_some_and(|last| now.saturating_duration_since(last) < every)
        {
            return;
        }
        state.last_reconcile = Some(now);

        let (command, drifted) = match self.role() {
            NodeRole::Active => (
                Command::Start,
                self.containers_in(|s| s != ContainerState::Running).await,
            ),
            NodeRole::Passive => (
                Command::Stop,
                self.containers_in(|s| s == ContainerState::Running).await,
            ),
        };
        if drifted.is_empty() {
            return;
        }

        info!(
            role = %self.role(),
            command = command.as_str(),
            containers = ?drifted,
            "Reconciling container drift"
        );
        self.issue(command, &drifted).await;
    }

    /// Names of observed containers whose state matches
    async fn containers_in(&self, matches: impl Fn(ContainerState) -> bool) -> Vec<String> {
        self.monitor
            .snapshot()
            .await
            .into_iter()
            .filter(|o| o.observed_at.is_some() && matches(o.state))
            .map(|o| o.name)
            .collect()
    }

    async fn issue_all(&self, command: Command) -> LifecycleReport {
        let names: Vec<String> = self
            .monitor
            .containers()
            .iter()
            .map(|c| c.name.clone())
            .collect();
        self.issue(command, &names).await
    }

    async fn issue(&self, command: Command, names: &[String]) -> LifecycleReport {
        let mut report = LifecycleReport::default();
        for name in names {
            let call = async {
                match command {
                    Command::Start => self.runtime.start(name).await,
                    Command::Stop => self.runtime.stop(name).await,
                }
            };
            match call_with_timeout(name, self.config.call_timeout, call).await {
                Ok(()) => {
                    report.succeeded += 1;
                    info!(container = %name, command = command.as_str(), "Lifecycle command completed");
                }
                Err(e) => {
                    report.failed += 1;
                    self.metrics.inc_runtime_errors(command.as_str());
                    error!(
                        container = %name,
                        command = command.as_str(),
                        error = %e,
                        "Lifecycle command failed"
                    );
                }
            }
        }
        report
    }

    /// Run the controller loop until shutdown
    ///
    /// A tick that has started is always awaited to completion, so a
    /// shutdown never interrupts a start or stop half-way.
    pub async fn run(self: Arc<Self>, health: HealthRegistry, mut shutdown: broadcast::Receiver<()>) {
        info!(
            node = %self.config.node,
            intended_role = %self.config.node.initial_role(),
            check_interval_secs = self.config.check_interval.as_secs(),
            startup_grace_secs = self.config.startup_grace_period.as_secs(),
            "Starting failover controller"
        );

        let mut ticker = interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let controller = Arc::clone(&self);
                    match tokio::spawn(async move { controller.tick().await }).await {
                        Ok(_) => {
                            health.set_healthy(components::CONTROLLER).await;
                            if self.is_engaged() {
                                health.set_ready(true).await;
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Controller tick failed, retrying on next tick");
                            health
                                .set_unhealthy(components::CONTROLLER, format!("tick failed: {}", e))
                                .await;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    warn!(role = %self.role(), "Shutting down failover controller, containers left as they are");
                    break;
                }
            }
        }
    }
}

/// Role taken on the first tick after the startup grace period
fn engagement(intended: NodeRole, fresh: bool) -> (NodeRole, DecisionReason) {
    match (intended, fresh) {
        // The peer is already active and heartbeating: stand by
        (NodeRole::Active, true) => (NodeRole::Passive, DecisionReason::HeartbeatRecovered),
        (NodeRole::Active, false) => (NodeRole::Active, DecisionReason::Startup),
        (NodeRole::Passive, false) => (NodeRole::Active, DecisionReason::HeartbeatLost),
        (NodeRole::Passive, true) => (NodeRole::Passive, DecisionReason::Startup),
    }
}
