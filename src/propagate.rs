//! Change propagation into the node's attribute store.

use crate::node::{AttributePath, AttributeValue, NodeEndpoint};
use log::{debug, error, info};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Writes sensor values into one endpoint attribute.
///
/// Failures are logged and counted, never returned.
pub struct ChangePropagator {
    endpoint: Arc<dyn NodeEndpoint>,
    path: AttributePath,
    accepted: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of the propagation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PropagationStats {
    pub accepted: u64,
    pub failed: u64,
}

impl ChangePropagator {
    /// Propagator for the endpoint's own sensor attribute.
    pub fn new(endpoint: Arc<dyn NodeEndpoint>) -> Self {
        let path = endpoint.kind().attribute();
        Self {
            endpoint,
            path,
            accepted: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &AttributePath {
        &self.path
    }

    pub async fn propagate(&self, value: impl Into<AttributeValue>) {
        let value = value.into();
        match self.endpoint.set_attribute(&self.path, value).await {
            Ok(()) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "[Propagate] {}/{} updated to {}",
                    self.endpoint.id(),
                    self.path,
                    value
                );
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    "[Propagate] Failed to update {}/{} to {}: {}",
                    self.endpoint.id(),
                    self.path,
                    value,
                    e
                );
            }
        }
    }

    pub fn stats(&self) -> PropagationStats {
        PropagationStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.stats();
        info!(
            "[Propagate] {}: {} update(s) accepted, {} failed",
            self.path, stats.accepted, stats.failed
        );
    }
}

/// Drain the change channel in order, one update at a time.
///
/// Ends when every sender is gone.
pub fn spawn_propagation<V>(
    propagator: Arc<ChangePropagator>,
    mut rx: mpsc::UnboundedReceiver<V>,
) -> JoinHandle<()>
where
    V: Into<AttributeValue> + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(value) = rx.recv().await {
            propagator.propagate(value).await;
        }
        debug!("[Propagate] Change channel closed");
    })
}
