//! State and metrics listeners
//!
//! Listeners are notified synchronously. A listener that fails or panics is
//! logged and skipped; it never affects the transition or the other
//! listeners.

use sluice_core::domain::state::PipelineState;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{error, warn};

/// Observer of pipeline status transitions
pub trait StateListener: Send + Sync {
    /// Called after `to` has been persisted
    fn on_state_change(&self, from: &PipelineState, to: &PipelineState) -> anyhow::Result<()>;
}

/// Observer of periodic metrics updates
pub trait MetricsListener: Send + Sync {
    /// Receives the serialized metrics of a running pipeline
    fn on_metrics_update(&self, pipeline: &str, metrics_json: &str) -> anyhow::Result<()>;
}

/// Registry and broadcaster of listeners
#[derive(Default)]
pub struct EventListenerManager {
    state_listeners: RwLock<Vec<Arc<dyn StateListener>>>,
    metrics_listeners: RwLock<Vec<Arc<dyn MetricsListener>>>,
}

impl EventListenerManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_state_listener(&self, listener: Arc<dyn StateListener>) {
        self.state_listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn add_metrics_listener(&self, listener: Arc<dyn MetricsListener>) {
        self.metrics_listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Notifies every state listener of a persisted transition
    pub fn broadcast_state_change(&self, from: &PipelineState, to: &PipelineState) {
        let listeners = self
            .state_listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener.on_state_change(from, to))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    "State listener failed on '{}' {} -> {}: {:#}",
                    to.name, from.status, to.status, e
                ),
                Err(_) => error!(
                    "State listener panicked on '{}' {} -> {}",
                    to.name, from.status, to.status
                ),
            }
        }
    }

    /// Pushes serialized metrics to every metrics listener
    pub fn broadcast_metrics(&self, pipeline: &str, metrics_json: &str) {
        let listeners = self
            .metrics_listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| {
                listener.on_metrics_update(pipeline, metrics_json)
            })) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Metrics listener failed for '{}': {:#}", pipeline, e),
                Err(_) => error!("Metrics listener panicked for '{}'", pipeline),
            }
        }
    }
}
