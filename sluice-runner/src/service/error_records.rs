//! Error record store
//!
//! Quarantines records routed to the error sink and keeps stage error
//! messages, both bounded per stage (oldest evicted first).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sluice_core::domain::record::Record;
use sluice_core::stage::ErrorSink;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// A stage-level error not tied to a single record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub stage: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-run error sink
pub struct ErrorRecordStore {
    max_per_stage: usize,
    records: Mutex<HashMap<String, VecDeque<Record>>>,
    messages: Mutex<HashMap<String, VecDeque<ErrorMessage>>>,
    total: AtomicU64,
}

impl ErrorRecordStore {
    pub fn new(max_per_stage: usize) -> Self {
        Self {
            max_per_stage,
            records: Mutex::new(HashMap::new()),
            messages: Mutex::new(HashMap::new()),
            total: AtomicU64::new(0),
        }
    }

    /// Records routed to the sink since the run started
    pub fn error_count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn report_error(&self, stage: &str, message: impl Into<String>) {
        let mut messages = self.messages.lock().unwrap_or_else(PoisonError::into_inner);
        push_bounded(
            messages.entry(stage.to_string()).or_default(),
            ErrorMessage {
                stage: stage.to_string(),
                message: message.into(),
                timestamp: Utc::now(),
            },
            self.max_per_stage,
        );
    }

    /// Most recent error records of a stage, newest last
    pub fn get_error_records(&self, stage: &str, max: usize) -> Vec<Record> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        newest(records.get(stage), max)
    }

    pub fn get_error_messages(&self, stage: &str, max: usize) -> Vec<ErrorMessage> {
        let messages = self.messages.lock().unwrap_or_else(PoisonError::into_inner);
        newest(messages.get(stage), max)
    }
}

impl ErrorSink for ErrorRecordStore {
    fn to_error(&self, stage: &str, record: Record, error_code: &str, cause: &str) {
        debug!(
            "Record '{}' routed to error by stage '{}' ({}): {}",
            record.header.source_id, stage, error_code, cause
        );
        let error_record = record.to_error_copy(stage, error_code, cause);
        self.total.fetch_add(1, Ordering::Relaxed);

        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        push_bounded(
            records.entry(stage.to_string()).or_default(),
            error_record,
            self.max_per_stage,
        );
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, max: usize) {
    if queue.len() >= max {
        queue.pop_front();
    }
    queue.push_back(item);
}

fn newest<T: Clone>(queue: Option<&VecDeque<T>>, max: usize) -> Vec<T> {
    queue
        .map(|q| q.iter().skip(q.len().saturating_sub(max)).cloned().collect())
        .unwrap_or_default()
}
