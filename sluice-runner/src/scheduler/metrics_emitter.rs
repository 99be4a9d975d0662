//! Metrics emitter
//!
//! While the pipeline is RUNNING, pushes its serialized metrics to the
//! metrics listeners at a fixed rate.

use async_trait::async_trait;
use sluice_core::domain::status::PipelineStatus;
use std::sync::Arc;
use tracing::warn;

use super::Worker;
use crate::metrics::PipelineMetrics;
use crate::service::{EventListenerManager, LifecycleStateMachine};

pub struct MetricsEmitter {
    pipeline: String,
    metrics: Arc<PipelineMetrics>,
    state_machine: Arc<LifecycleStateMachine>,
    listeners: Arc<EventListenerManager>,
}

impl MetricsEmitter {
    pub fn new(
        pipeline: impl Into<String>,
        metrics: Arc<PipelineMetrics>,
        state_machine: Arc<LifecycleStateMachine>,
        listeners: Arc<EventListenerManager>,
    ) -> Self {
        Self {
            pipeline: pipeline.into(),
            metrics,
            state_machine,
            listeners,
        }
    }

    pub fn emit(&self) {
        match self.state_machine.status() {
            Ok(PipelineStatus::Running) => {}
            Ok(_) => return,
            Err(e) => {
                warn!("Cannot read status of '{}': {}", self.pipeline, e);
                return;
            }
        }

        match self.metrics.to_json() {
            Ok(json) => self.listeners.broadcast_metrics(&self.pipeline, &json),
            Err(e) => warn!("Failed to serialize metrics of '{}': {}", self.pipeline, e),
        }
    }
}

#[async_trait]
impl Worker for MetricsEmitter {
    fn name(&self) -> &'static str {
        "metrics-emitter"
    }

    async fn run_once(&self) {
        self.emit();
    }
}
