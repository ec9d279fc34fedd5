//! Query-level readiness probe and pool helpers for PostgreSQL.

use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgPoolOptions};
use sqlx::{Connection, PgPool};
use std::time::Duration;

/// Query used to prove the engine can serve requests.
pub const READINESS_QUERY: &str = "SELECT 1";

/// Checks whether a database accepts real queries.
#[async_trait]
pub trait QueryProbe: Send + Sync {
    /// Open a fresh connection to `url`, run the readiness query and close
    /// the connection again, whatever the outcome.
    async fn probe(&self, url: &str) -> Result<(), sqlx::Error>;
}

/// [`QueryProbe`] that connects with sqlx.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgQueryProbe;

#[async_trait]
impl QueryProbe for PgQueryProbe {
    async fn probe(&self, url: &str) -> Result<(), sqlx::Error> {
        let mut conn = PgConnection::connect(url).await?;
        let result = sqlx::query_scalar::<_, i32>(READINESS_QUERY)
            .fetch_one(&mut conn)
            .await;
        // The close outcome doesn't matter; the query result decides.
        let _ = conn.close().await;

        readiness_outcome(result)
    }
}

/// Map the readiness query's scalar to the probe result. Anything but 1 is
/// a protocol error.
fn readiness_outcome(result: Result<i32, sqlx::Error>) -> Result<(), sqlx::Error> {
    match result? {
        1 => Ok(()),
        other => Err(sqlx::Error::Protocol(format!(
            "readiness query returned {} instead of 1",
            other
        ))),
    }
}

/// Build a small connection pool for a provisioned instance.
pub async fn connect_pool(url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect(url)
        .await
}
