//! Provisioning entry point and the handle it returns.

use crate::config::{connection_string, StartOptions};
use crate::containers::image::ensure_image;
use crate::containers::lifecycle::{launch, postgres_container_spec, stop_and_remove, Rollback};
use crate::credentials::random_password;
use crate::error::{ProvisionError, Result};
use crate::probe::{connect_pool, PgQueryProbe, QueryProbe};
use crate::readiness::ReadinessGate;
use crate::runtime::{ContainerRuntime, ContainerSpec, DockerRuntime};
use sqlx::PgPool;
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A running, query-ready PostgreSQL container.
///
/// Only ever handed out fully provisioned. The container is not reclaimed
/// automatically: call [`PostgresInstance::shutdown`] when done, or it is
/// left running.
pub struct PostgresInstance {
    id: String,
    password: String,
    port: String,
}

impl PostgresInstance {
    /// Connection URI for the instance's database.
    pub fn connection_string(&self) -> String {
        connection_string(&self.password, &self.port)
    }

    /// Runtime identifier of the container.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Host port the database is published on.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Create a connection pool against the instance.
    pub async fn pool(&self) -> std::result::Result<PgPool, sqlx::Error> {
        connect_pool(&self.connection_string()).await
    }

    /// Stop and remove the container using a fresh runtime client.
    ///
    /// Cancelling `cancel` ends the wait early with `ShutdownCancelled`.
    pub async fn shutdown(&self, cancel: &CancellationToken) -> Result<()> {
        let runtime = DockerRuntime::connect().map_err(ProvisionError::RuntimeUnavailable)?;
        self.shutdown_with(&runtime, cancel).await
    }

    /// Stop and remove the container through `runtime`.
    ///
    /// Repeated calls are not guarded against; the runtime decides how a
    /// second stop or remove behaves.
    pub async fn shutdown_with<R>(&self, runtime: &R, cancel: &CancellationToken) -> Result<()>
    where
        R: ContainerRuntime + ?Sized,
    {
        stop_and_remove(runtime, &self.id, cancel).await?;
        info!(id = %self.id, "Instance shut down");
        Ok(())
    }
}

impl fmt::Debug for PostgresInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresInstance")
            .field("id", &self.id)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .finish()
    }
}

/// Start a throwaway PostgreSQL container and wait until it serves queries.
///
/// `version` is the image tag, e.g. `"16"` for `postgres:16`. The steps are:
///
/// 1. Pull the image if it isn't cached locally
/// 2. Create and start the container with a random password and host port
/// 3. Wait for the runtime to report it healthy
/// 4. Wait for it to answer a real query
///
/// Any failure after the container is created removes it again before the
/// error is returned. Cancelling `cancel` aborts the wait at the next poll.
///
/// # Example
///
/// ```rust,ignore
/// use ephemeral_pg::start_instance;
/// use tokio_util::sync::CancellationToken;
///
/// let pg = start_instance(&CancellationToken::new(), "16", None).await?;
/// let pool = pg.pool().await?;
/// sqlx::query("SELECT 1").execute(&pool).await?;
/// pg.shutdown(&CancellationToken::new()).await?;
/// ```
pub async fn start_instance(
    cancel: &CancellationToken,
    version: &str,
    options: Option<StartOptions>,
) -> Result<PostgresInstance> {
    let runtime = DockerRuntime::connect().map_err(ProvisionError::RuntimeUnavailable)?;
    Provisioner::new(&runtime, &PgQueryProbe)
        .start(cancel, version, options)
        .await
}

/// Runs the provisioning phases against a given runtime and probe.
pub struct Provisioner<'a, R: ?Sized, P: ?Sized> {
    runtime: &'a R,
    probe: &'a P,
}

impl<'a, R, P> Provisioner<'a, R, P>
where
    R: ContainerRuntime + ?Sized,
    P: QueryProbe + ?Sized,
{
    pub fn new(runtime: &'a R, probe: &'a P) -> Self {
        Self { runtime, probe }
    }

    /// Provision one instance. See [`start_instance`].
    pub async fn start(
        &self,
        cancel: &CancellationToken,
        version: &str,
        options: Option<StartOptions>,
    ) -> Result<PostgresInstance> {
        let mut options = options.unwrap_or_default();
        let image = options.image_ref(version);
        let mut progress = options.take_pull_progress();

        ensure_image(self.runtime, &image, &mut progress).await?;

        let password = random_password()?;
        let gate = ReadinessGate::new(options.effective_health_check_timeout());
        let spec = postgres_container_spec(image, &password);

        let mut rollback = Rollback::new();
        match self.launch_until_ready(&spec, &password, &gate, cancel, &mut rollback).await {
            Ok((id, port)) => {
                rollback.commit();
                Ok(PostgresInstance { id, password, port })
            }
            Err(e) => {
                warn!(image = %spec.image, "Provisioning failed, rolling back: {}", e);
                rollback.unwind(self.runtime).await;
                Err(e)
            }
        }
    }

    async fn launch_until_ready(
        &self,
        spec: &ContainerSpec,
        password: &str,
        gate: &ReadinessGate,
        cancel: &CancellationToken,
        rollback: &mut Rollback,
    ) -> Result<(String, String)> {
        let id = launch(self.runtime, spec, rollback).await?;
        let port = gate
            .run(self.runtime, self.probe, &id, password, cancel)
            .await?;
        Ok((id, port))
    }
}
