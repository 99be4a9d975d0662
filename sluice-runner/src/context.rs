//! Per-run context
//!
//! Everything that only exists while a run is active: its metrics, error
//! records, sampled records, background workers and the main loop handle.
//! Dropping the context aborts the workers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;

use crate::metrics::PipelineMetrics;
use crate::scheduler::{DataRuleObserver, WorkerSet};
use crate::service::ErrorRecordStore;

pub struct RunContext {
    pub metrics: Arc<PipelineMetrics>,
    pub errors: Arc<ErrorRecordStore>,
    pub data_observer: Arc<DataRuleObserver>,
    workers: WorkerSet,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl RunContext {
    pub fn new(
        metrics: Arc<PipelineMetrics>,
        errors: Arc<ErrorRecordStore>,
        data_observer: Arc<DataRuleObserver>,
        workers: WorkerSet,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            metrics,
            errors,
            data_observer,
            workers,
            stop,
            handle: None,
        }
    }

    pub fn set_handle(&mut self, handle: JoinHandle<()>) {
        self.handle = Some(handle);
    }

    /// Asks the main loop to exit before its next batch and hands back its
    /// handle so the caller can wait for the in-flight batch
    pub fn signal_stop(&mut self) -> Option<JoinHandle<()>> {
        self.stop.store(true, Ordering::SeqCst);
        self.handle.take()
    }

    /// Aborts every background worker of the run
    pub fn shutdown(&mut self) {
        self.workers.abort_all();
    }
}
