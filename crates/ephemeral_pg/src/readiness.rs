//! Readiness gate: runtime health first, then real queries.
//!
//! The runtime's health probe only checks that the server accepts
//! connections, which is already true while PostgreSQL is still replaying
//! its recovery log. So readiness is decided in two stages, each with its
//! own deadline:
//!
//! 1. Poll the container until the runtime reports it healthy, noting the
//!    host port the runtime assigned along the way.
//! 2. Open fresh connections and run the readiness query until one
//!    succeeds.
//!
//! Worst case the gate takes twice the configured timeout.

use crate::config::connection_string;
use crate::error::{LifecycleStage, ProvisionError, Result};
use crate::probe::QueryProbe;
use crate::runtime::{ContainerRuntime, HealthStatus};
use std::fmt;
use std::time::Duration;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Interval between polls in both stages
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Stand-in deadline for timeouts too large to add to the clock (~30 years).
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `now + timeout`, saturating to a far-future instant instead of overflowing.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Non-terminal states of the gate. Failures end the gate with an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    WaitingForHealth,
    HealthConfirmed,
    QueryVerified,
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateState::WaitingForHealth => write!(f, "waiting for health"),
            GateState::HealthConfirmed => write!(f, "health confirmed"),
            GateState::QueryVerified => write!(f, "query verified"),
        }
    }
}

/// Two-stage readiness check with a per-stage timeout.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessGate {
    timeout: Duration,
    poll_interval: Duration,
}

impl ReadinessGate {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run both stages, returning the discovered host port.
    pub async fn run<R, P>(
        &self,
        runtime: &R,
        probe: &P,
        id: &str,
        password: &str,
        cancel: &CancellationToken,
    ) -> Result<String>
    where
        R: ContainerRuntime + ?Sized,
        P: QueryProbe + ?Sized,
    {
        debug!(%id, state = %GateState::WaitingForHealth, "Readiness gate entered");
        let port = self.wait_for_health(runtime, id, cancel).await?;
        info!(%id, %port, state = %GateState::HealthConfirmed, "Container reported healthy");

        self.verify_queries(probe, &connection_string(password, &port), cancel)
            .await?;
        info!(%id, %port, state = %GateState::QueryVerified, "Database ready");

        Ok(port)
    }

    /// Stage A: poll the runtime's health status until it reports healthy.
    ///
    /// Missing, "starting" and unrecognised statuses all mean "keep waiting".
    /// The host port must have been seen by the time health turns healthy.
    pub async fn wait_for_health<R>(
        &self,
        runtime: &R,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<String>
    where
        R: ContainerRuntime + ?Sized,
    {
        let deadline = deadline_after(self.timeout);
        let mut ticker = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut port: Option<String> = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(ProvisionError::Cancelled {
                        state: GateState::WaitingForHealth,
                    })
                }
                _ = ticker.tick() => {}
            }

            if Instant::now() > deadline {
                return Err(ProvisionError::HealthTimeout {
                    timeout: self.timeout,
                });
            }

            let snapshot = runtime
                .inspect_container(id)
                .await
                .map_err(|e| ProvisionError::lifecycle(LifecycleStage::Inspect, e))?;

            if port.is_none() {
                if let Some(host_port) = snapshot.host_port {
                    debug!(%id, port = %host_port, "Discovered host port");
                    port = Some(host_port);
                }
            }

            match snapshot.health {
                Some(HealthStatus::Healthy) => break,
                Some(HealthStatus::Unhealthy) => return Err(ProvisionError::Unhealthy),
                status => debug!(%id, ?status, "Container not healthy yet"),
            }
        }

        port.ok_or(ProvisionError::PortDiscovery)
    }

    /// Stage B: retry the readiness query until it succeeds or time runs out.
    ///
    /// The deadline starts fresh here. Probe errors only mean "not ready
    /// yet"; the last one is kept for the timeout error.
    pub async fn verify_queries<P>(
        &self,
        probe: &P,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        P: QueryProbe + ?Sized,
    {
        let deadline = deadline_after(self.timeout);
        let mut last_error = None;
        let mut attempts = 0u32;

        while Instant::now() < deadline {
            if cancel.is_cancelled() {
                return Err(ProvisionError::Cancelled {
                    state: GateState::HealthConfirmed,
                });
            }

            attempts += 1;
            match probe.probe(url).await {
                Ok(()) => {
                    debug!(attempts, "Readiness query succeeded");
                    return Ok(());
                }
                Err(e) => {
                    debug!(attempts, "Database not ready yet: {}", e);
                    last_error = Some(e);
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(ProvisionError::Cancelled {
                        state: GateState::HealthConfirmed,
                    })
                }
                _ = sleep(self.poll_interval) => {}
            }
        }

        Err(ProvisionError::QueryReadinessTimeout {
            timeout: self.timeout,
            last_error,
        })
    }
}
