//! Failover library for a two-node active/passive container pair
//!
//! This crate provides:
//! - Container health monitoring against a pluggable runtime (Docker)
//! - The heartbeat channel between the two peers
//! - The failover controller that decides ACTIVE or PASSIVE
//! - The HTTP surface, health checks and observability

pub mod api;
pub mod clock;
pub mod controller;
pub mod error;
pub mod health;
pub mod heartbeat;
pub mod models;
pub mod monitor;
pub mod observability;
pub mod runtime;

pub use controller::{ControllerConfig, FailoverController};
pub use error::{FailoverError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use heartbeat::{HeartbeatConfig, HeartbeatRecord, HeartbeatSender};
pub use models::*;
pub use monitor::{ContainerHealthMonitor, MonitorConfig};
pub use observability::{FailoverMetrics, StructuredLogger};
