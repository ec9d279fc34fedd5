//! Container runtime seam.
//!
//! Provisioning talks to the runtime only through [`ContainerRuntime`], so the
//! readiness and rollback logic can run against an in-process fake in tests
//! and against Docker (via bollard) everywhere else.

pub mod docker;

pub use docker::DockerRuntime;

use crate::config::ImageRef;
use crate::error::RuntimeError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;

/// Health classification reported by the runtime's own probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Starting,
    Healthy,
    Unhealthy,
    /// Anything else the runtime reports (empty, "none", future values).
    Unknown,
}

/// Point-in-time view of a container, as returned by inspect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSnapshot {
    /// `None` until the runtime has initialised the health check.
    pub health: Option<HealthStatus>,
    /// First non-empty host port bound to the engine port, if any.
    pub host_port: Option<String>,
}

/// Health probe the runtime runs inside the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthProbe {
    pub command: Vec<String>,
    pub interval: Duration,
    pub timeout: Duration,
    pub retries: u32,
}

/// Everything needed to create the database container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: ImageRef,
    pub env: Vec<(String, String)>,
    pub health_probe: HealthProbe,
    /// Container port to publish, e.g. `5432/tcp`.
    pub container_port: String,
    /// Host address to publish on; the host port is picked by the runtime.
    pub host_ip: String,
}

/// Operations provisioning needs from a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Succeeds if the image is available locally.
    async fn inspect_image(&self, image: &ImageRef) -> Result<(), RuntimeError>;

    /// Pull an image, yielding raw progress output until the pull finishes.
    fn pull_image<'a>(&'a self, image: &'a ImageRef) -> BoxStream<'a, Result<Vec<u8>, RuntimeError>>;

    /// Create (but do not start) a container, returning its identifier.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerSnapshot, RuntimeError>;

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError>;
}
