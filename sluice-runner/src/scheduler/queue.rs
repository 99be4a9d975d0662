//! Bounded work queue between the production observer and the data rule
//! observer
//!
//! Producers block on a full queue; that wait is the only backpressure point
//! of a run.

use sluice_core::domain::record::Record;
use sluice_core::domain::rule::RuleDefinitions;
use tokio::sync::mpsc;

/// Entry of the work queue
#[derive(Debug, Clone)]
pub enum WorkQueueEntry {
    /// Records sampled from a stage's output for data rule evaluation
    Sample { stage: String, records: Vec<Record> },
    /// The pipeline's rules changed
    RulesChange(RuleDefinitions),
}

pub type WorkQueueSender = mpsc::Sender<WorkQueueEntry>;
pub type WorkQueueReceiver = mpsc::Receiver<WorkQueueEntry>;

/// Creates the queue of one run
pub fn work_queue(capacity: usize) -> (WorkQueueSender, WorkQueueReceiver) {
    mpsc::channel(capacity.max(1))
}
