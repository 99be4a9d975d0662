//! Live metrics of a pipeline run
//!
//! Counters are updated by the main loop and read concurrently by the metric
//! rule observer, the metrics emitter and the state machine (which persists a
//! serialized copy when the run leaves an active status).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sluice_core::domain::rule::MetricKind;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Record counts of one stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StageCounters {
    pub input_records: u64,
    pub output_records: u64,
}

/// Point-in-time copy of a run's metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub started_at: DateTime<Utc>,
    pub batch_count: u64,
    pub input_records: u64,
    pub output_records: u64,
    pub error_records: u64,
    pub last_batch_millis: u64,
    pub memory_usage_bytes: u64,
    pub stages: BTreeMap<String, StageCounters>,
}

/// Metrics registry of one run
#[derive(Debug)]
pub struct PipelineMetrics {
    started_at: DateTime<Utc>,
    batch_count: AtomicU64,
    input_records: AtomicU64,
    output_records: AtomicU64,
    error_records: AtomicU64,
    last_batch_millis: AtomicU64,
    memory_usage_bytes: AtomicU64,
    stages: Mutex<BTreeMap<String, StageCounters>>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            batch_count: AtomicU64::new(0),
            input_records: AtomicU64::new(0),
            output_records: AtomicU64::new(0),
            error_records: AtomicU64::new(0),
            last_batch_millis: AtomicU64::new(0),
            memory_usage_bytes: AtomicU64::new(0),
            stages: Mutex::new(BTreeMap::new()),
        }
    }

    /// Accounts for one batch that went through the whole graph
    pub fn record_batch(&self, input: usize, output: usize, errors: u64, elapsed: Duration) {
        self.batch_count.fetch_add(1, Ordering::Relaxed);
        self.input_records.fetch_add(input as u64, Ordering::Relaxed);
        self.output_records.fetch_add(output as u64, Ordering::Relaxed);
        self.error_records.fetch_add(errors, Ordering::Relaxed);
        self.last_batch_millis
            .store(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    /// Accounts for one stage's share of a batch
    pub fn record_stage(&self, stage: &str, input: usize, output: usize) {
        let mut stages = self.stages.lock().unwrap_or_else(PoisonError::into_inner);
        let counters = stages.entry(stage.to_string()).or_default();
        counters.input_records += input as u64;
        counters.output_records += output as u64;
    }

    pub fn set_memory_usage(&self, bytes: u64) {
        self.memory_usage_bytes.store(bytes, Ordering::Relaxed);
    }

    /// Current value of the metric a metric rule watches
    pub fn value(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::BatchCount => self.batch_count.load(Ordering::Relaxed) as f64,
            MetricKind::InputRecords => self.input_records.load(Ordering::Relaxed) as f64,
            MetricKind::OutputRecords => self.output_records.load(Ordering::Relaxed) as f64,
            MetricKind::ErrorRecords => self.error_records.load(Ordering::Relaxed) as f64,
            MetricKind::LastBatchMillis => self.last_batch_millis.load(Ordering::Relaxed) as f64,
            MetricKind::MemoryUsageMb => {
                self.memory_usage_bytes.load(Ordering::Relaxed) as f64 / (1024.0 * 1024.0)
            }
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            started_at: self.started_at,
            batch_count: self.batch_count.load(Ordering::Relaxed),
            input_records: self.input_records.load(Ordering::Relaxed),
            output_records: self.output_records.load(Ordering::Relaxed),
            error_records: self.error_records.load(Ordering::Relaxed),
            last_batch_millis: self.last_batch_millis.load(Ordering::Relaxed),
            memory_usage_bytes: self.memory_usage_bytes.load(Ordering::Relaxed),
            stages: self
                .stages
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    /// Serializes the current metrics to JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.snapshot())
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
