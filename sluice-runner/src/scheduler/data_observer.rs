//! Data rule observer
//!
//! Consumes the run's work queue. Sampled records are checked against the
//! data rules of the stage they were sampled from; matches are retained per
//! rule (oldest evicted) and counted, and a rule whose match count reaches its
//! alert threshold raises an alert.

use sluice_core::domain::record::Record;
use sluice_core::domain::rule::DataRuleDefinition;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::debug;

use super::queue::{WorkQueueEntry, WorkQueueReceiver};
use crate::service::AlertManager;

#[derive(Default)]
struct RuleSamples {
    records: VecDeque<Record>,
    matched: u64,
}

pub struct DataRuleObserver {
    pipeline: String,
    max_samples: usize,
    alerts: Arc<AlertManager>,
    rules: RwLock<Vec<DataRuleDefinition>>,
    samples: Mutex<HashMap<String, RuleSamples>>,
}

impl DataRuleObserver {
    /// # Arguments
    /// * `pipeline` - Pipeline name, used on raised alerts
    /// * `max_samples` - Global cap on records retained per rule
    /// * `alerts` - Alert gauges of the pipeline
    pub fn new(pipeline: impl Into<String>, max_samples: usize, alerts: Arc<AlertManager>) -> Self {
        Self {
            pipeline: pipeline.into(),
            max_samples,
            alerts,
            rules: RwLock::new(Vec::new()),
            samples: Mutex::new(HashMap::new()),
        }
    }

    /// Drains the queue until every producer is gone or the task is aborted
    pub async fn run(self: Arc<Self>, mut receiver: WorkQueueReceiver) {
        while let Some(entry) = receiver.recv().await {
            self.handle(entry);
        }
        debug!("Work queue of pipeline '{}' closed", self.pipeline);
    }

    pub fn handle(&self, entry: WorkQueueEntry) {
        match entry {
            WorkQueueEntry::RulesChange(rules) => self.reconfigure(rules.data_rules),
            WorkQueueEntry::Sample { stage, records } => self.evaluate(&stage, &records),
        }
    }

    fn reconfigure(&self, data_rules: Vec<DataRuleDefinition>) {
        let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        samples.retain(|id, _| data_rules.iter().any(|r| &r.id == id));
        *self.rules.write().unwrap_or_else(PoisonError::into_inner) = data_rules;
    }

    fn evaluate(&self, stage: &str, records: &[Record]) {
        let rules = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);

        for rule in rules.iter().filter(|r| r.enabled && r.lane == stage) {
            let retain = rule.sampling_records_to_retain.min(self.max_samples);
            let entry = samples.entry(rule.id.clone()).or_default();

            for record in records.iter().filter(|r| rule.matches(r)) {
                entry.matched += 1;
                if retain == 0 {
                    continue;
                }
                while entry.records.len() >= retain {
                    entry.records.pop_front();
                }
                entry.records.push_back(record.clone());
            }

            if rule.alert_threshold > 0 && entry.matched >= rule.alert_threshold {
                self.alerts.raise(
                    &self.pipeline,
                    &rule.id,
                    entry.matched as f64,
                    rule.alert_threshold as f64,
                );
            }
        }
    }

    /// Most recent records matching `rule_id`, newest last
    pub fn get_sampled_records(&self, rule_id: &str, max: usize) -> Vec<Record> {
        let samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        samples
            .get(rule_id)
            .map(|s| {
                let skip = s.records.len().saturating_sub(max);
                s.records.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    /// Number of records that matched `rule_id` so far
    pub fn match_count(&self, rule_id: &str) -> u64 {
        let samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        samples.get(rule_id).map(|s| s.matched).unwrap_or(0)
    }
}
