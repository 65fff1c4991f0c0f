//! Error taxonomy for the failover agent
//!
//! Only [`FailoverError::ConfigInvalid`] is fatal. Every other variant is
//! absorbed by the component that raised it and folded into the health or
//! freshness model.

use std::time::Duration;
use thiserror::Error;

/// Errors produced by the failover components
#[derive(Debug, Error)]
pub enum FailoverError {
    /// A container runtime call failed or timed out
    #[error("container runtime unavailable for {container}: {reason}")]
    RuntimeUnavailable { container: String, reason: String },

    /// The peer could not be reached with a heartbeat
    #[error("heartbeat to {endpoint} failed: {reason}")]
    HeartbeatSendFailed { endpoint: String, reason: String },

    /// An inbound heartbeat request was rejected
    #[error("malformed heartbeat: {0}")]
    HeartbeatMalformed(String),

    /// Configuration is missing or unsatisfiable
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}

impl FailoverError {
    pub fn runtime(container: impl Into<String>, reason: impl ToString) -> Self {
        Self::RuntimeUnavailable {
            container: container.into(),
            reason: reason.to_string(),
        }
    }

    pub fn runtime_timeout(container: impl Into<String>, timeout: Duration) -> Self {
        Self::RuntimeUnavailable {
            container: container.into(),
            reason: format!("call timed out after {}ms", timeout.as_millis()),
        }
    }

    /// Short label used for metrics and structured log fields
    pub fn kind(&self) -> &'static str {
        match self {
            FailoverError::RuntimeUnavailable { .. } => "runtime_unavailable",
            FailoverError::HeartbeatSendFailed { .. } => "heartbeat_send_failed",
            FailoverError::HeartbeatMalformed(_) => "heartbeat_malformed",
            FailoverError::ConfigInvalid(_) => "config_invalid",
        }
    }
}

pub type Result<T> = std::result::Result<T, FailoverError>;
