//! Core data models for the failover agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::time::Instant;

/// Operative role of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Runs the managed containers
    Active,
    /// Keeps the managed containers stopped and stands by
    Passive,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Active => "active",
            NodeRole::Passive => "passive",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which of the two peers this process is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeName {
    Server1,
    Server2,
}

impl NodeName {
    /// `server1` starts out intending to be active, `server2` passive
    pub fn initial_role(&self) -> NodeRole {
        match self {
            NodeName::Server1 => NodeRole::Active,
            NodeName::Server2 => NodeRole::Passive,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeName::Server1 => "server1",
            NodeName::Server2 => "server2",
        }
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "server1" => Ok(NodeName::Server1),
            "server2" => Ok(NodeName::Server2),
            other => Err(format!("unknown node '{}', expected server1 or server2", other)),
        }
    }
}

/// A managed container, by name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Container state as reported by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Running,
    Stopped,
    Unknown,
}

impl ContainerState {
    pub fn is_running(&self) -> bool {
        matches!(self, ContainerState::Running)
    }
}

/// Latest observation of one managed container
#[derive(Debug, Clone)]
pub struct ContainerObservation {
    pub name: String,
    pub state: ContainerState,
    /// `None` until the first poll completes
    pub observed_at: Option<Instant>,
    /// Start of the current down period, cleared when the container runs again
    pub down_since: Option<Instant>,
    /// Last runtime error, cleared by the next successful status call
    pub last_error: Option<String>,
}

impl ContainerObservation {
    pub fn unobserved(spec: &ContainerSpec) -> Self {
        Self {
            name: spec.name.clone(),
            state: ContainerState::Unknown,
            observed_at: None,
            down_since: None,
            last_error: None,
        }
    }
}

/// Rolled-up local health of all managed containers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalHealth {
    /// Every container is running
    Healthy,
    /// Some container is down, still within the restart grace period
    DegradedSince(Instant),
    /// Some container has stayed down for at least the restart grace period
    DownSince(Instant),
}

impl LocalHealth {
    pub fn label(&self) -> &'static str {
        match self {
            LocalHealth::Healthy => "healthy",
            LocalHealth::DegradedSince(_) => "degraded",
            LocalHealth::DownSince(_) => "down",
        }
    }
}

/// Why a role decision was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Startup,
    LocalContainersDown,
    HeartbeatLost,
    HeartbeatRecovered,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::Startup => "startup",
            DecisionReason::LocalContainersDown => "local_containers_down",
            DecisionReason::HeartbeatLost => "heartbeat_lost",
            DecisionReason::HeartbeatRecovered => "heartbeat_recovered",
        }
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A role decision emitted by the controller. Never mutated once recorded.
#[derive(Debug, Clone)]
pub struct FailoverDecision {
    pub role: NodeRole,
    pub reason: DecisionReason,
    /// Monotonic instant the decision was taken
    pub at: Instant,
    /// Wall clock time, for display only
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_name_initial_roles() {
        assert_eq!(NodeName::Server1.initial_role(), NodeRole::Active);
        assert_eq!(NodeName::Server2.initial_role(), NodeRole::Passive);
    }

    #[test]
    fn test_node_name_parse() {
        assert_eq!("server2".parse::<NodeName>(), Ok(NodeName::Server2));
        assert!("server3".parse::<NodeName>().is_err());
    }

    #[test]
    fn test_serde_labels() {
        assert_eq!(serde_json::to_string(&NodeRole::Active).unwrap(), "\"active\"");
        assert_eq!(
            serde_json::to_string(&DecisionReason::LocalContainersDown).unwrap(),
            "\"local_containers_down\""
        );
    }
}
