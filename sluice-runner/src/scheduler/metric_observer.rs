//! Metric rule observer
//!
//! Evaluates the enabled metric rules against the live metrics of the run,
//! raising an alert while a rule's condition holds and clearing it once it no
//! longer does.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::Worker;
use crate::metrics::PipelineMetrics;
use crate::pipeline::observer::ProductionObserver;
use crate::service::AlertManager;

pub struct MetricRuleObserver {
    pipeline: String,
    metrics: Arc<PipelineMetrics>,
    observer: Arc<ProductionObserver>,
    alerts: Arc<AlertManager>,
}

impl MetricRuleObserver {
    pub fn new(
        pipeline: impl Into<String>,
        metrics: Arc<PipelineMetrics>,
        observer: Arc<ProductionObserver>,
        alerts: Arc<AlertManager>,
    ) -> Self {
        Self {
            pipeline: pipeline.into(),
            metrics,
            observer,
            alerts,
        }
    }

    pub fn evaluate(&self) {
        let rules = self.observer.rules();
        for rule in rules.metric_rules.iter().filter(|r| r.enabled) {
            let value = self.metrics.value(rule.metric);
            if rule.comparison.holds(value, rule.threshold) {
                self.alerts
                    .raise(&self.pipeline, &rule.id, value, rule.threshold);
            } else if self.alerts.clear(&rule.id) {
                info!(
                    "Alert '{}' of pipeline '{}' cleared (value {})",
                    rule.id, self.pipeline, value
                );
            }
        }
    }
}

#[async_trait]
impl Worker for MetricRuleObserver {
    fn name(&self) -> &'static str {
        "metric-rule-observer"
    }

    async fn run_once(&self) {
        self.evaluate();
    }
}
