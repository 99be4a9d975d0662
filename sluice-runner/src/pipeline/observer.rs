//! Production observer
//!
//! Sits on the main loop's side of the work queue: samples each stage's
//! output according to the data rules on that lane and queues the sample for
//! the data rule observer. Holds the rules currently in force so the metric
//! rule observer reads the same set.

use rand::Rng;
use sluice_core::domain::record::Record;
use sluice_core::domain::rule::RuleDefinitions;
use std::sync::{PoisonError, RwLock};
use tracing::warn;

use crate::scheduler::queue::{WorkQueueEntry, WorkQueueSender};

pub struct ProductionObserver {
    sender: WorkQueueSender,
    rules: RwLock<RuleDefinitions>,
}

impl ProductionObserver {
    pub fn new(sender: WorkQueueSender) -> Self {
        Self {
            sender,
            rules: RwLock::new(RuleDefinitions::default()),
        }
    }

    pub fn reconfigure(&self, rules: RuleDefinitions) {
        *self.rules.write().unwrap_or_else(PoisonError::into_inner) = rules;
    }

    pub fn rules(&self) -> RuleDefinitions {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Queues a rules change; waits while the queue is full
    pub async fn push_rules_change(&self, rules: RuleDefinitions) {
        if self.sender.send(WorkQueueEntry::RulesChange(rules)).await.is_err() {
            warn!("Work queue closed, dropping rules change");
        }
    }

    /// Highest sampling percentage among the enabled data rules of `stage`
    fn sampling_percentage(&self, stage: &str) -> Option<f64> {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        rules
            .data_rules
            .iter()
            .filter(|r| r.enabled && r.lane == stage)
            .map(|r| r.sampling_percentage.clamp(0.0, 100.0))
            .reduce(f64::max)
    }

    /// Samples `records`, the output of `stage`, for data rule evaluation
    ///
    /// Waits while the queue is full; this is the run's backpressure point.
    pub async fn observe(&self, stage: &str, records: &[Record]) {
        let Some(percentage) = self.sampling_percentage(stage) else {
            return;
        };
        let sample: Vec<Record> = if percentage >= 100.0 {
            records.to_vec()
        } else {
            let mut rng = rand::thread_rng();
            records
                .iter()
                .filter(|_| rng.gen_bool(percentage / 100.0))
                .cloned()
                .collect()
        };
        if sample.is_empty() {
            return;
        }

        let entry = WorkQueueEntry::Sample {
            stage: stage.to_string(),
            records: sample,
        };
        if self.sender.send(entry).await.is_err() {
            warn!("Work queue closed, dropping sample of stage '{}'", stage);
        }
    }
}
