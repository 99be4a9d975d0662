//! Background workers of a pipeline run
//!
//! Each run owns a [`WorkerSet`]: the rules config loader, the metric rule
//! observer, the data rule observer (the queue consumer), the metrics emitter
//! and the update checker. Periodic workers implement [`Worker`] and are
//! scheduled either with a fixed delay between runs or at a fixed rate.
//! Stopping the run aborts every handle in the set.

pub mod data_observer;
pub mod metric_observer;
pub mod metrics_emitter;
pub mod queue;
pub mod rules_loader;
pub mod update_checker;

pub use data_observer::DataRuleObserver;
pub use metric_observer::MetricRuleObserver;
pub use metrics_emitter::MetricsEmitter;
pub use queue::{WorkQueueEntry, WorkQueueReceiver, WorkQueueSender, work_queue};
pub use rules_loader::RulesConfigLoader;
pub use update_checker::UpdateChecker;

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tracing::debug;

/// A periodic task of a pipeline run
///
/// `run_once` must not fail: workers log their own errors and try again on
/// the next scheduled invocation.
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn run_once(&self);
}

/// Handles of every task spawned for one run
#[derive(Default)]
pub struct WorkerSet {
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl WorkerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `worker` repeatedly, waiting `delay` before each run
    pub fn spawn_fixed_delay(&mut self, worker: Arc<dyn Worker>, delay: Duration) {
        let name = worker.name();
        let handle = tokio::spawn(async move {
            loop {
                time::sleep(delay).await;
                worker.run_once().await;
            }
        });
        debug!("Scheduled worker '{}' with fixed delay {:?}", name, delay);
        self.handles.push((name, handle));
    }

    /// Runs `worker` every `period`, starting immediately
    pub fn spawn_fixed_rate(&mut self, worker: Arc<dyn Worker>, period: Duration) {
        let name = worker.name();
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(period);
            loop {
                ticker.tick().await;
                worker.run_once().await;
            }
        });
        debug!("Scheduled worker '{}' at fixed rate {:?}", name, period);
        self.handles.push((name, handle));
    }

    /// Spawns a long-running task
    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handles.push((name, tokio::spawn(task)));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Aborts every task in the set
    pub fn abort_all(&mut self) {
        for (name, handle) in self.handles.drain(..) {
            handle.abort();
            debug!("Aborted worker '{}'", name);
        }
    }
}

impl Drop for WorkerSet {
    fn drop(&mut self) {
        self.abort_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    #[async_trait]
    impl Worker for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        async fn run_once(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_delay_waits_before_first_run() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let mut workers = WorkerSet::new();
        workers.spawn_fixed_delay(counter.clone(), Duration::from_secs(1));

        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_millis(2600)).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_rate_runs_immediately() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let mut workers = WorkerSet::new();
        workers.spawn_fixed_rate(counter.clone(), Duration::from_secs(10));

        time::sleep(Duration::from_millis(1)).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_all_stops_workers() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let mut workers = WorkerSet::new();
        workers.spawn_fixed_delay(counter.clone(), Duration::from_secs(1));
        assert_eq!(workers.len(), 1);

        workers.abort_all();
        assert!(workers.is_empty());

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }
}
