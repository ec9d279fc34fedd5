//! Container lifecycle management: create, start, rollback, stop, remove.

use crate::config::{ImageRef, CONTAINER_PORT, DATABASE_NAME, HOST_IP, USERNAME};
use crate::error::{LifecycleStage, ProvisionError, Result};
use crate::runtime::{ContainerRuntime, ContainerSpec, HealthProbe};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Interval between runs of the in-container health probe
const PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Time allowed for a single health probe run
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Consecutive probe failures before the runtime reports unhealthy
const PROBE_RETRIES: u32 = 30;

/// Build the container definition for a PostgreSQL instance.
pub fn postgres_container_spec(image: ImageRef, password: &str) -> ContainerSpec {
    ContainerSpec {
        image,
        env: vec![
            ("POSTGRES_DB".to_string(), DATABASE_NAME.to_string()),
            ("POSTGRES_PASSWORD".to_string(), password.to_string()),
            ("POSTGRES_USER".to_string(), USERNAME.to_string()),
        ],
        health_probe: HealthProbe {
            command: vec![
                "CMD-SHELL".to_string(),
                format!(
                    "pg_isready -h {} -U {} -d {}",
                    HOST_IP, USERNAME, DATABASE_NAME
                ),
            ],
            interval: PROBE_INTERVAL,
            timeout: PROBE_TIMEOUT,
            retries: PROBE_RETRIES,
        },
        container_port: CONTAINER_PORT.to_string(),
        host_ip: HOST_IP.to_string(),
    }
}

/// Containers created by an in-flight provisioning call.
///
/// Every container is recorded the moment it exists, so a failure in any
/// later step can still reclaim it with [`Rollback::unwind`].
#[derive(Debug, Default)]
pub struct Rollback {
    containers: Vec<String>,
}

impl Rollback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a container that must be reclaimed if provisioning fails.
    pub fn record(&mut self, id: impl Into<String>) {
        self.containers.push(id.into());
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    /// Provisioning succeeded; the caller now owns the containers.
    pub fn commit(mut self) {
        self.containers.clear();
    }

    /// Best-effort stop and force-remove of everything recorded.
    ///
    /// Failures are logged and swallowed so they never replace the error
    /// that triggered the rollback.
    pub async fn unwind<R>(mut self, runtime: &R)
    where
        R: ContainerRuntime + ?Sized,
    {
        while let Some(id) = self.containers.pop() {
            info!(%id, "Rolling back container");
            if let Err(e) = runtime.stop_container(&id).await {
                warn!(%id, "Error stopping container during rollback: {}", e);
            }
            if let Err(e) = runtime.remove_container(&id, true).await {
                warn!(%id, "Error removing container during rollback: {}", e);
            }
        }
    }
}

impl Drop for Rollback {
    fn drop(&mut self) {
        // Dropped neither committed nor unwound, e.g. the provisioning future
        // was cancelled mid-flight. We can't await here.
        for id in &self.containers {
            warn!(%id, "Rollback dropped before unwinding, container may be orphaned");
        }
    }
}

/// Create and start the database container.
///
/// The container is recorded in `rollback` before the start attempt, so a
/// start failure leaves it there for the caller to unwind.
pub async fn launch<R>(runtime: &R, spec: &ContainerSpec, rollback: &mut Rollback) -> Result<String>
where
    R: ContainerRuntime + ?Sized,
{
    let id = runtime
        .create_container(spec)
        .await
        .map_err(|e| ProvisionError::lifecycle(LifecycleStage::Create, e))?;
    rollback.record(id.clone());
    info!(%id, image = %spec.image, "Container created");

    runtime
        .start_container(&id)
        .await
        .map_err(|e| ProvisionError::lifecycle(LifecycleStage::Start, e))?;
    debug!(%id, "Container started");

    Ok(id)
}

/// Stop and then remove a container, reporting each failure separately.
///
/// Cancelling `cancel` abandons whichever call is in flight and returns
/// `ShutdownCancelled`; the container may then still exist.
pub async fn stop_and_remove<R>(runtime: &R, id: &str, cancel: &CancellationToken) -> Result<()>
where
    R: ContainerRuntime + ?Sized,
{
    let cancelled = || ProvisionError::ShutdownCancelled { id: id.to_string() };

    info!(%id, "Stopping container");
    tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(cancelled()),
        result = runtime.stop_container(id) => result.map_err(|source| ProvisionError::Stop {
            id: id.to_string(),
            source,
        })?,
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(cancelled()),
        result = runtime.remove_container(id, false) => result.map_err(|source| ProvisionError::Remove {
            id: id.to_string(),
            source,
        })?,
    }
    debug!(%id, "Container removed");

    Ok(())
}
