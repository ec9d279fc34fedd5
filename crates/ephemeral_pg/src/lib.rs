//! Ephemeral PostgreSQL
//!
//! Throwaway PostgreSQL containers for tests. [`start_instance`] pulls the
//! image if needed, starts a container on a random host port with a random
//! password, and only returns once the database answers real queries.
//!
//! # Features
//!
//! - `docker-tests`: Enable tests that require a running Docker daemon
//!
//! # Usage
//!
//! ```rust,ignore
//! use ephemeral_pg::{start_instance, StartOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::test]
//! #[cfg(feature = "docker-tests")]
//! async fn test_against_postgres() {
//!     let pg = start_instance(&CancellationToken::new(), "16", None).await.unwrap();
//!     let pool = pg.pool().await.unwrap();
//!
//!     sqlx::query("CREATE TABLE output (id INT)").execute(&pool).await.unwrap();
//!     // ...
//!
//!     pg.shutdown(&CancellationToken::new()).await.unwrap();
//! }
//! ```
//!
//! Starting a container takes a few seconds (longer on the first pull), so
//! share one instance across a suite where possible. A handle that is
//! dropped without `shutdown` leaves its container running.

pub mod config;
pub mod containers;
pub mod credentials;
pub mod error;
pub mod instance;
pub mod probe;
pub mod readiness;
pub mod runtime;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use config::{ImageRef, StartOptions};
pub use error::{ProvisionError, Result, RuntimeError};
pub use instance::{start_instance, PostgresInstance, Provisioner};
pub use probe::{PgQueryProbe, QueryProbe};
pub use runtime::{ContainerRuntime, DockerRuntime};
pub use tokio_util::sync::CancellationToken;
