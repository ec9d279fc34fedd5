//! Provisioning configuration and fixed engine settings.

use std::fmt;
use std::time::Duration;
use tokio::io::AsyncWrite;

/// Image used when no override is configured.
pub const DEFAULT_IMAGE: &str = "postgres";

/// Database created inside every instance.
pub const DATABASE_NAME: &str = "pgtest";

/// Admin account created inside every instance.
pub const USERNAME: &str = "pgtest";

/// Port the engine listens on inside the container.
pub const CONTAINER_PORT: &str = "5432/tcp";

/// Host address the port binding is published on.
pub const HOST_IP: &str = "127.0.0.1";

/// Default time allowed for each readiness stage.
pub const DEFAULT_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(30);

/// Versioned image reference, e.g. `postgres:16`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    /// Repository name
    pub name: String,
    /// Version tag
    pub tag: String,
}

impl ImageRef {
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

/// Sink receiving raw image pull progress.
pub type ProgressSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Options for a single provisioning call.
///
/// Consumed by `start_instance`; nothing is retained once the call returns.
///
/// # Example
///
/// ```rust,ignore
/// use ephemeral_pg::StartOptions;
/// use std::time::Duration;
///
/// let options = StartOptions::new()
///     .image("bitnamilegacy/postgresql")
///     .health_check_timeout(Duration::from_secs(90))
///     .pull_progress(tokio::io::stdout());
/// ```
#[derive(Default)]
pub struct StartOptions {
    image: Option<String>,
    health_check_timeout: Option<Duration>,
    pull_progress: Option<ProgressSink>,
}

impl StartOptions {
    /// Create options with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the base image (e.g. a private cache or registry mirror).
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Maximum time to wait in each readiness stage. Zero means "use the default".
    pub fn health_check_timeout(mut self, timeout: Duration) -> Self {
        self.health_check_timeout = Some(timeout);
        self
    }

    /// Stream image pull progress to `writer` instead of discarding it.
    pub fn pull_progress<W>(mut self, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.pull_progress = Some(Box::new(writer));
        self
    }

    /// Effective readiness timeout.
    pub fn effective_health_check_timeout(&self) -> Duration {
        match self.health_check_timeout {
            Some(timeout) if !timeout.is_zero() => timeout,
            _ => DEFAULT_HEALTH_CHECK_TIMEOUT,
        }
    }

    /// Image reference for the requested version tag.
    pub fn image_ref(&self, version: &str) -> ImageRef {
        let name = match self.image.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => DEFAULT_IMAGE,
        };
        ImageRef::new(name, version)
    }

    /// Take the progress sink, falling back to one that discards everything.
    pub(crate) fn take_pull_progress(&mut self) -> ProgressSink {
        self.pull_progress
            .take()
            .unwrap_or_else(|| Box::new(tokio::io::sink()))
    }
}

impl fmt::Debug for StartOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartOptions")
            .field("image", &self.image)
            .field("health_check_timeout", &self.health_check_timeout)
            .field("pull_progress", &self.pull_progress.is_some())
            .finish()
    }
}

/// Build the connection URI for an instance.
pub fn connection_string(password: &str, port: &str) -> String {
    format!(
        "postgres://{}:{}@{}:{}/{}",
        USERNAME, password, HOST_IP, port, DATABASE_NAME
    )
}
