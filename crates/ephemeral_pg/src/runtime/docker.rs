//! Docker backend for the runtime seam.

use super::{ContainerRuntime, ContainerSnapshot, ContainerSpec, HealthStatus};
use crate::config::{ImageRef, CONTAINER_PORT};
use crate::error::RuntimeError;
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{
    ContainerInspectResponse, CreateImageInfo, HealthConfig, HealthStatusEnum, HostConfig,
    PortBinding, PortMap,
};
use bollard::Docker;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Host port value that asks the runtime to pick any free port.
const ANY_HOST_PORT: &str = "0";

/// [`ContainerRuntime`] backed by the local Docker daemon.
///
/// Holds one client connection; construct one per top-level call and drop it
/// when the call is done.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the platform's default socket.
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    /// Wrap an already configured bollard client.
    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn inspect_image(&self, image: &ImageRef) -> Result<(), RuntimeError> {
        match self.docker.inspect_image(&image.to_string()).await {
            Ok(_) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message,
            }) => Err(RuntimeError::not_found(message)),
            Err(e) => Err(e.into()),
        }
    }

    fn pull_image<'a>(&'a self, image: &'a ImageRef) -> BoxStream<'a, Result<Vec<u8>, RuntimeError>> {
        let options = CreateImageOptions {
            from_image: image.name.clone(),
            tag: image.tag.clone(),
            ..Default::default()
        };
        self.docker
            .create_image(Some(options), None, None)
            .map(encode_progress)
            .boxed()
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let response = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, container_config(spec))
            .await?;
        for warning in &response.warnings {
            debug!(id = %response.id, "Docker create warning: {}", warning);
        }
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerSnapshot, RuntimeError> {
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;
        Ok(snapshot_from(&response))
    }

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .stop_container(id, None::<StopContainerOptions>)
            .await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.docker.remove_container(id, Some(options)).await?;
        Ok(())
    }
}

/// One JSON line per progress record, as the Docker API streams it.
fn encode_progress(
    item: Result<CreateImageInfo, bollard::errors::Error>,
) -> Result<Vec<u8>, RuntimeError> {
    let info = item?;
    let mut line = serde_json::to_vec(&info)?;
    line.push(b'\n');
    Ok(line)
}

fn nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

fn container_config(spec: &ContainerSpec) -> Config<String> {
    let env = spec
        .env
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect();

    let mut port_bindings: PortMap = HashMap::new();
    port_bindings.insert(
        spec.container_port.clone(),
        Some(vec![PortBinding {
            host_ip: Some(spec.host_ip.clone()),
            host_port: Some(ANY_HOST_PORT.to_string()),
        }]),
    );

    Config {
        image: Some(spec.image.to_string()),
        env: Some(env),
        healthcheck: Some(HealthConfig {
            test: Some(spec.health_probe.command.clone()),
            interval: Some(nanos(spec.health_probe.interval)),
            timeout: Some(nanos(spec.health_probe.timeout)),
            retries: Some(i64::from(spec.health_probe.retries)),
            ..Default::default()
        }),
        host_config: Some(HostConfig {
            port_bindings: Some(port_bindings),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn snapshot_from(response: &ContainerInspectResponse) -> ContainerSnapshot {
    let health = response
        .state
        .as_ref()
        .and_then(|state| state.health.as_ref())
        .map(|health| match health.status {
            Some(HealthStatusEnum::HEALTHY) => HealthStatus::Healthy,
            Some(HealthStatusEnum::UNHEALTHY) => HealthStatus::Unhealthy,
            Some(HealthStatusEnum::STARTING) => HealthStatus::Starting,
            _ => HealthStatus::Unknown,
        });

    let host_port = response
        .network_settings
        .as_ref()
        .and_then(|settings| settings.ports.as_ref())
        .and_then(|ports| ports.get(CONTAINER_PORT))
        .and_then(|bindings| bindings.as_ref())
        .and_then(|bindings| bindings.first())
        .and_then(|binding| binding.host_port.clone())
        .filter(|port| !port.is_empty());

    ContainerSnapshot { health, host_port }
}
