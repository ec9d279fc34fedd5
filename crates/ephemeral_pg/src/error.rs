//! Error types for provisioning and shutdown.

use crate::readiness::GateState;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Provisioning result type.
pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Errors reported by the container runtime seam.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The requested object (image or container) does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Docker API error (transport, daemon, etc.)
    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// Pull progress could not be encoded
    #[error("Progress encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Any other runtime failure
    #[error("{0}")]
    Other(String),
}

impl RuntimeError {
    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a generic runtime error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Whether this error classifies as "object does not exist".
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Docker(bollard::errors::Error::DockerResponseServerError {
                status_code, ..
            }) => *status_code == 404,
            _ => false,
        }
    }
}

/// Container operation that failed while launching or polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStage {
    Create,
    Start,
    Inspect,
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleStage::Create => write!(f, "create"),
            LifecycleStage::Start => write!(f, "start"),
            LifecycleStage::Inspect => write!(f, "inspect"),
        }
    }
}

/// Errors returned by `start_instance` and `PostgresInstance::shutdown`.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Could not construct a client for the container runtime
    #[error("Container runtime unavailable: {0}")]
    RuntimeUnavailable(#[source] RuntimeError),

    /// Image inspect or pull failed (never retried)
    #[error("Failed to resolve image {image}: {source}")]
    ImageResolution {
        image: String,
        #[source]
        source: RuntimeError,
    },

    /// The secure random source failed
    #[error("Failed to generate credentials: {0}")]
    CredentialGeneration(#[source] rand::Error),

    /// Container create, start or inspect failed
    #[error("Failed to {stage} container: {source}")]
    Lifecycle {
        stage: LifecycleStage,
        #[source]
        source: RuntimeError,
    },

    /// The runtime never reported healthy before the deadline
    #[error("Timed out after {timeout:?} waiting for container to become healthy")]
    HealthTimeout { timeout: Duration },

    /// The runtime reported the container as unhealthy
    #[error("Container unhealthy")]
    Unhealthy,

    /// Health reported ready but no host port binding was ever observed
    #[error("Failed to get assigned port from container")]
    PortDiscovery,

    /// Healthy container never answered the readiness query
    #[error("Database not ready after healthcheck passed (timeout: {timeout:?})")]
    QueryReadinessTimeout {
        timeout: Duration,
        #[source]
        last_error: Option<sqlx::Error>,
    },

    /// Caller cancelled while the readiness gate was in `state`
    #[error("Cancelled while container was in state: {state}")]
    Cancelled { state: GateState },

    /// Caller cancelled before shutdown finished
    #[error("Shutdown of container {id} cancelled")]
    ShutdownCancelled { id: String },

    /// Shutdown could not stop the container
    #[error("Failed to stop container {id}: {source}")]
    Stop {
        id: String,
        #[source]
        source: RuntimeError,
    },

    /// Shutdown could not remove the container
    #[error("Failed to remove container {id}: {source}")]
    Remove {
        id: String,
        #[source]
        source: RuntimeError,
    },
}

impl ProvisionError {
    pub(crate) fn lifecycle(stage: LifecycleStage, source: RuntimeError) -> Self {
        Self::Lifecycle { stage, source }
    }

    /// Whether the error came from a readiness timeout (either stage).
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::HealthTimeout { .. } | Self::QueryReadinessTimeout { .. }
        )
    }
}
