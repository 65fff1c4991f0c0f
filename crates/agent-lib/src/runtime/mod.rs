//! Container runtime collaborator
//!
//! The failover core only needs three operations per named container:
//! status, start and stop. [`DockerRuntime`] talks to the local Docker
//! Engine; [`InMemoryRuntime`] keeps state in memory and records every call.

mod docker;
mod memory;

pub use docker::DockerRuntime;
pub use memory::{InMemoryRuntime, RuntimeCall};

use crate::error::{FailoverError, Result};
use crate::models::ContainerState;
use std::future::Future;
use std::time::Duration;

pub use async_trait::async_trait;

/// Minimal container lifecycle interface
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Current state of the named container
    async fn status(&self, name: &str) -> Result<ContainerState>;

    /// Start the named container
    async fn start(&self, name: &str) -> Result<()>;

    /// Stop the named container
    async fn stop(&self, name: &str) -> Result<()>;
}

/// Run a runtime call, mapping an elapsed timeout to `RuntimeUnavailable`
pub async fn call_with_timeout<T, F>(container: &str, timeout: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(FailoverError::runtime_timeout(container, timeout)),
    }
}
