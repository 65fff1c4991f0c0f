//! Failover Agent - two-node active/passive container failover
//!
//! One instance runs on each of the two servers. The active node keeps the
//! managed containers running and heartbeats its peer; the passive node
//! keeps them stopped and takes over when the heartbeat goes stale.

use anyhow::{Context, Result};
use clap::Parser;
use failover_lib::{
    api::{self, AppState},
    clock::{Clock, TokioClock},
    health::{components, HealthRegistry},
    runtime::{ContainerRuntime, DockerRuntime},
    ContainerHealthMonitor, FailoverController, HeartbeatRecord, HeartbeatSender, NodeName,
    StructuredLogger,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinError;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "failover-agent", version, about = "Two-node container failover agent")]
struct Args {
    /// Which server this is (server1 starts active, server2 passive)
    #[arg(long, env = "FAILOVER_SERVER")]
    server: NodeName,

    /// Optional TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let args = Args::parse();
    info!(server = %args.server, "Starting failover-agent");

    // Configuration errors are fatal before any loop starts
    let config = config::AgentConfig::load(args.config.as_deref())
        .and_then(|c| c.validate(args.server))
        .map_err(|e| {
            error!(error = %e, "Invalid configuration");
            e
        })?;
    info!(
        node = %config.node,
        endpoint = %config.heartbeat.endpoint,
        port = config.port,
        containers = config.containers.len(),
        "Agent configured"
    );

    // A node that cannot receive heartbeats must not start any loop
    let listener = api::bind(config.port).await.map_err(|e| {
        error!(error = %e, "Cannot bind API listener");
        e
    })?;

    let docker = DockerRuntime::connect_local().context("connecting to the Docker daemon")?;
    if let Err(e) = docker.ping().await {
        // The monitor treats an unreachable runtime as containers down
        warn!(error = %e, "Docker daemon not reachable yet");
    }
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(docker);
    let clock: Arc<dyn Clock> = Arc::new(TokioClock);

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    health_registry.register(components::MONITOR).await;
    health_registry.register(components::HEARTBEAT_SENDER).await;
    health_registry.register(components::CONTROLLER).await;

    // Initialize structured logger
    let logger = StructuredLogger::new(config.node.as_str());
    logger.log_startup(
        AGENT_VERSION,
        config.node.initial_role(),
        config.containers.len(),
    );

    let monitor = Arc::new(ContainerHealthMonitor::new(
        config.containers.clone(),
        Arc::clone(&runtime),
        Arc::clone(&clock),
        config.monitor.clone(),
        logger.clone(),
    ));
    let heartbeat = Arc::new(HeartbeatRecord::new(
        config.node.as_str(),
        config.heartbeat.timeout,
        Arc::clone(&clock),
    ));
    let controller = Arc::new(FailoverController::new(
        config.controller.clone(),
        Arc::clone(&monitor),
        Arc::clone(&heartbeat),
        Arc::clone(&runtime),
        Arc::clone(&clock),
        logger.clone(),
    ));
    let sender = Arc::new(
        HeartbeatSender::new(config.node, config.heartbeat.clone(), controller.subscribe())
            .context("building heartbeat sender")?,
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Create shared application state
    let app_state = Arc::new(AppState {
        health_registry: health_registry.clone(),
        heartbeat,
        monitor: Arc::clone(&monitor),
        controller: Arc::clone(&controller),
        clock,
    });

    let mut api_handle = tokio::spawn(api::serve(listener, app_state, shutdown_tx.subscribe()));
    let monitor_handle = tokio::spawn(monitor.run(health_registry.clone(), shutdown_tx.subscribe()));
    let sender_handle = tokio::spawn(sender.run(health_registry.clone(), shutdown_tx.subscribe()));
    let controller_handle =
        tokio::spawn(controller.run(health_registry.clone(), shutdown_tx.subscribe()));

    // Wait for a shutdown signal, or for the API server to die
    let api_stopped_early = tokio::select! {
        reason = wait_for_signal() => {
            logger.log_shutdown(reason?);
            false
        }
        res = &mut api_handle => {
            log_api_exit(res);
            logger.log_shutdown("API server stopped");
            true
        }
    };
    let _ = shutdown_tx.send(());

    for (name, handle) in [
        ("monitor", monitor_handle),
        ("heartbeat_sender", sender_handle),
        ("controller", controller_handle),
    ] {
        if let Err(e) = handle.await {
            error!(task = name, error = %e, "Task ended abnormally");
        }
    }
    if api_stopped_early {
        anyhow::bail!("API server stopped, agent can no longer receive heartbeats");
    }
    log_api_exit(api_handle.await);

    info!("Shutdown complete");
    Ok(())
}

fn log_api_exit(res: std::result::Result<Result<()>, JoinError>) {
    match res {
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task ended abnormally"),
        Ok(Ok(())) => {}
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("waiting for SIGINT")?;
            Ok("SIGINT received")
        }
        _ = sigterm.recv() => Ok("SIGTERM received"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c().await.context("waiting for SIGINT")?;
    Ok("SIGINT received")
}
