//! In-memory container runtime
//!
//! Holds container states in a map and records every call, so the failover
//! logic can be exercised without a container engine.

use super::{async_trait, ContainerRuntime};
use crate::error::{FailoverError, Result};
use crate::models::ContainerState;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

/// A call made against the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Status(String),
    Start(String),
    Stop(String),
}

#[derive(Debug, Default)]
struct Inner {
    states: HashMap<String, ContainerState>,
    unreachable: HashSet<String>,
    broken: HashSet<String>,
    calls: Vec<RuntimeCall>,
    delay: Option<Duration>,
}

/// Runtime that keeps container state in memory
#[derive(Debug, Default)]
pub struct InMemoryRuntime {
    inner: Mutex<Inner>,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a runtime with the given containers in the given state
    pub fn with_containers<'a>(
        names: impl IntoIterator<Item = &'a str>,
        state: ContainerState,
    ) -> Self {
        let runtime = Self::new();
        for name in names {
            runtime.set_state(name, state);
        }
        runtime
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_state(&self, name: &str, state: ContainerState) {
        self.lock().states.insert(name.to_string(), state);
    }

    pub fn state(&self, name: &str) -> Option<ContainerState> {
        self.lock().states.get(name).copied()
    }

    /// Make every call for `name` fail as if the runtime could not be reached
    pub fn set_unreachable(&self, name: &str, unreachable: bool) {
        let mut inner = self.lock();
        if unreachable {
            inner.unreachable.insert(name.to_string());
        } else {
            inner.unreachable.remove(name);
        }
    }

    /// A broken container accepts `start` but never reaches the running state
    pub fn set_broken(&self, name: &str, broken: bool) {
        let mut inner = self.lock();
        if broken {
            inner.broken.insert(name.to_string());
        } else {
            inner.broken.remove(name);
        }
    }

    /// Delay every call, to exercise caller timeouts
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.lock().delay = delay;
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.lock().calls.clone()
    }

    pub fn start_calls(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                RuntimeCall::Start(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn stop_calls(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                RuntimeCall::Stop(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of start and stop calls made so far
    pub fn lifecycle_call_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| !matches!(c, RuntimeCall::Status(_)))
            .count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Record the call and return the configured delay and reachability
    fn begin(&self, call: RuntimeCall, name: &str) -> (Option<Duration>, bool) {
        let mut inner = self.lock();
        inner.calls.push(call);
        (inner.delay, inner.unreachable.contains(name))
    }

    async fn enter(&self, call: RuntimeCall, name: &str) -> Result<()> {
        let (delay, unreachable) = self.begin(call, name);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if unreachable {
            return Err(FailoverError::runtime(name, "connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for InMemoryRuntime {
    async fn status(&self, name: &str) -> Result<ContainerState> {
        self.enter(RuntimeCall::Status(name.to_string()), name).await?;
        self.lock()
            .states
            .get(name)
            .copied()
            .ok_or_else(|| FailoverError::runtime(name, "container not found"))
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.enter(RuntimeCall::Start(name.to_string()), name).await?;
        let mut inner = self.lock();
        if !inner.states.contains_key(name) {
            return Err(FailoverError::runtime(name, "container not found"));
        }
        let state = if inner.broken.contains(name) {
            ContainerState::Stopped
        } else {
            ContainerState::Running
        };
        inner.states.insert(name.to_string(), state);
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        self.enter(RuntimeCall::Stop(name.to_string()), name).await?;
        let mut inner = self.lock();
        match inner.states.get_mut(name) {
            Some(state) => {
                *state = ContainerState::Stopped;
                Ok(())
            }
            None => Err(FailoverError::runtime(name, "container not found")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_stop_round() {
        let runtime = InMemoryRuntime::with_containers(["web"], ContainerState::Stopped);

        runtime.start("web").await.unwrap();
        assert_eq!(runtime.status("web").await.unwrap(), ContainerState::Running);

        runtime.stop("web").await.unwrap();
        assert_eq!(runtime.state("web"), Some(ContainerState::Stopped));

        assert_eq!(runtime.start_calls(), vec!["web".to_string()]);
        assert_eq!(runtime.stop_calls(), vec!["web".to_string()]);
        assert_eq!(runtime.lifecycle_call_count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_container_errors() {
        let runtime = InMemoryRuntime::new();
        assert!(runtime.status("ghost").await.is_err());
        assert!(runtime.start("ghost").await.is_err());
    }

    #[tokio::test]
    async fn test_broken_container_never_runs() {
        let runtime = InMemoryRuntime::with_containers(["db"], ContainerState::Stopped);
        runtime.set_broken("db", true);

        runtime.start("db").await.unwrap();
        assert_eq!(runtime.state("db"), Some(ContainerState::Stopped));
    }

    #[tokio::test]
    async fn test_unreachable_runtime() {
        let runtime = InMemoryRuntime::with_containers(["web"], ContainerState::Running);
        runtime.set_unreachable("web", true);

        let err = runtime.status("web").await.unwrap_err();
        assert_eq!(err.kind(), "runtime_unavailable");
    }
}
