//! Status reconciliation against runtime events.
//!
//! [`Reconciler::reconcile`] converges one container's record status and
//! backend route with what the runtime reports. [`StatusReconciler`] runs it
//! for every `start`/`die` event, resubscribing whenever the event stream
//! ends until shutdown is signaled.

use std::sync::Arc;
use std::time::Duration;

use berth_routing::{backend_name, RoutingError, RoutingRegistrar, DEFAULT_SERVER_NAME};
use futures_util::StreamExt;
use rand::Rng;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::db::{ContainerStatus, ContainerStore, DbError};
use crate::runtime::{ContainerRuntime, RuntimeError, RuntimeEvent, DEFAULT_NETWORK};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("inspect failed: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("status update failed: {0}")]
    Store(#[from] DbError),

    #[error("route update failed: {0}")]
    Routing(#[from] RoutingError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The container carries no record id label.
    NotOurs,
    Updated { id: i64, status: ContainerStatus },
}

/// Converges record status and backend routes with runtime state.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn ContainerStore>,
    runtime: Arc<dyn ContainerRuntime>,
    routing: RoutingRegistrar,
    network: String,
}

impl Reconciler {
    /// `network` is the runtime network addresses are read from; `None`
    /// means the default bridge.
    pub fn new(
        store: Arc<dyn ContainerStore>,
        runtime: Arc<dyn ContainerRuntime>,
        routing: RoutingRegistrar,
        network: Option<String>,
    ) -> Self {
        Self {
            store,
            runtime,
            routing,
            network: network.unwrap_or_else(|| DEFAULT_NETWORK.to_string()),
        }
    }

    /// Reconcile the container with runtime id `runtime_id`.
    ///
    /// A runtime-reported error is written as `Error` first; the final status
    /// always follows the running flag.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, runtime_id: &str) -> Result<ReconcileOutcome, ReconcileError> {
        let details = self.runtime.inspect_container(runtime_id).await?;
        let Some(id) = details.record_id() else {
            return Ok(ReconcileOutcome::NotOurs);
        };

        if !details.state.error.is_empty() {
            warn!(container_id = id, error = %details.state.error, "Runtime reported an error");
            self.store
                .update_status(id, ContainerStatus::Error, &details.state.error)
                .await?;
        }

        let backend = backend_name(id);
        match details.address_on(&self.network) {
            Some(address) => {
                self.routing
                    .upsert_backend(&backend, DEFAULT_SERVER_NAME, &format!("http://{address}"))
                    .await?
            }
            None => self.routing.delete_backend(&backend).await?,
        }

        let status = if details.state.running {
            ContainerStatus::Running
        } else {
            ContainerStatus::Stopped
        };
        self.store.update_status(id, status, "").await?;

        debug!(container_id = id, status = %status, "Reconciled container");
        Ok(ReconcileOutcome::Updated { id, status })
    }
}

// =============================================================================
// Backoff
// =============================================================================

/// Exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Jitter factor (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            max: Duration::from_secs(30),
            jitter: 0.25,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self.base.as_millis() as f64 * 2.0_f64.powi(attempt.min(32) as i32);
        let delay = delay.min(self.max.as_millis() as f64);

        let jitter = if self.jitter > 0.0 {
            rand::rng().random_range(-1.0..=1.0) * delay * self.jitter
        } else {
            0.0
        };
        Duration::from_millis((delay + jitter).max(0.0) as u64)
    }
}

// =============================================================================
// Event loop
// =============================================================================

enum StreamEnd {
    Shutdown,
    Ended {
        delivered: u64,
        error: Option<RuntimeError>,
    },
}

/// Supervised runtime event loop.
pub struct StatusReconciler {
    reconciler: Reconciler,
    backoff: BackoffPolicy,
}

impl StatusReconciler {
    pub fn new(reconciler: Reconciler) -> Self {
        Self {
            reconciler,
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Watch runtime events until shutdown is signaled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(network = %self.reconciler.network, "Starting status reconciler");
        let mut attempt: u32 = 0;

        loop {
            let (delivered, error) = match self.watch_events(&mut shutdown).await {
                StreamEnd::Shutdown => break,
                StreamEnd::Ended { delivered, error } => (delivered, error),
            };

            if delivered > 0 {
                attempt = 0;
            }
            let delay = self.backoff.delay(attempt);
            attempt = attempt.saturating_add(1);

            match &error {
                Some(e) => warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Runtime event stream failed, resubscribing"
                ),
                None => warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Runtime event stream ended, resubscribing"
                ),
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Status reconciler shutting down");
    }

    async fn watch_events(&self, shutdown: &mut watch::Receiver<bool>) -> StreamEnd {
        if *shutdown.borrow() {
            return StreamEnd::Shutdown;
        }

        let mut events = match self.reconciler.runtime.events().await {
            Ok(events) => events,
            Err(e) => {
                return StreamEnd::Ended {
                    delivered: 0,
                    error: Some(e),
                }
            }
        };

        let mut delivered = 0;
        loop {
            tokio::select! {
                item = events.next() => match item {
                    Some(Ok(event)) => {
                        delivered += 1;
                        self.handle(&event).await;
                    }
                    Some(Err(e)) => return StreamEnd::Ended { delivered, error: Some(e) },
                    None => return StreamEnd::Ended { delivered, error: None },
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return StreamEnd::Shutdown;
                    }
                }
            }
        }
    }

    async fn handle(&self, event: &RuntimeEvent) {
        if event.kind != "container" || !matches!(event.action.as_str(), "start" | "die") {
            return;
        }

        match self.reconciler.reconcile(&event.actor_id).await {
            Ok(ReconcileOutcome::NotOurs) => {
                debug!(runtime_id = %event.actor_id, "Ignoring foreign container")
            }
            Ok(ReconcileOutcome::Updated { .. }) => {}
            Err(e) => error!(
                runtime_id = %event.actor_id,
                action = %event.action,
                error = %e,
                "Reconcile failed"
            ),
        }
    }
}
