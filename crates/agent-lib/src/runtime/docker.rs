//! Docker Engine runtime over the local socket

use super::{async_trait, ContainerRuntime};
use crate::error::{FailoverError, Result};
use crate::models::ContainerState;
use bollard::container::{InspectContainerOptions, StartContainerOptions, StopContainerOptions};
use bollard::errors::Error as DockerError;
use bollard::models::ContainerStateStatusEnum;
use bollard::Docker;
use tracing::{debug, info};

/// Container runtime backed by the Docker Engine API
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connect using the platform defaults (`DOCKER_HOST` or the local socket)
    pub fn connect_local() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| FailoverError::runtime("docker", e))?;
        Ok(Self::new(docker))
    }

    /// Check the daemon is reachable
    pub async fn ping(&self) -> Result<()> {
        let version = self
            .docker
            .version()
            .await
            .map_err(|e| FailoverError::runtime("docker", e))?;
        info!(
            version = version.version.as_deref().unwrap_or("unknown"),
            "Connected to Docker Engine"
        );
        Ok(())
    }
}

fn map_state(status: Option<ContainerStateStatusEnum>) -> ContainerState {
    match status {
        Some(ContainerStateStatusEnum::RUNNING) => ContainerState::Running,
        Some(ContainerStateStatusEnum::CREATED)
        | Some(ContainerStateStatusEnum::EXITED)
        | Some(ContainerStateStatusEnum::DEAD)
        | Some(ContainerStateStatusEnum::PAUSED) => ContainerState::Stopped,
        _ => ContainerState::Unknown,
    }
}

fn map_error(container: &str, err: DockerError) -> FailoverError {
    match err {
        DockerError::DockerResponseServerError {
            status_code: 404, ..
        } => FailoverError::runtime(container, "container not found"),
        other => FailoverError::runtime(container, other),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn status(&self, name: &str) -> Result<ContainerState> {
        let inspect = self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_error(name, e))?;

        let state = map_state(inspect.state.and_then(|s| s.status));
        debug!(container = %name, state = ?state, "Inspected container");
        Ok(state)
    }

    async fn start(&self, name: &str) -> Result<()> {
        match self
            .docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            // Already running
            Err(DockerError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(map_error(name, e)),
        }
    }

    async fn stop(&self, name: &str) -> Result<()> {
        match self
            .docker
            .stop_container(name, Some(StopContainerOptions { t: 0 }))
            .await
        {
            Ok(()) => Ok(()),
            // Already stopped
            Err(DockerError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(map_error(name, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_state() {
        assert_eq!(
            map_state(Some(ContainerStateStatusEnum::RUNNING)),
            ContainerState::Running
        );
        assert_eq!(
            map_state(Some(ContainerStateStatusEnum::EXITED)),
            ContainerState::Stopped
        );
        assert_eq!(
            map_state(Some(ContainerStateStatusEnum::RESTARTING)),
            ContainerState::Unknown
        );
        assert_eq!(map_state(None), ContainerState::Unknown);
    }

    #[test]
    fn test_map_error_not_found() {
        let err = map_error(
            "web",
            DockerError::DockerResponseServerError {
                status_code: 404,
                message: "No such container: web".to_string(),
            },
        );
        assert_eq!(
            err.to_string(),
            "container runtime unavailable for web: container not found"
        );
    }
}
