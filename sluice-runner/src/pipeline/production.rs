//! Production pipeline main loop
//!
//! One iteration per batch: read from the source at the committed offset, run
//! the processors in order, fan the result out to every target, then commit
//! the new offset. The stop flag is only checked between batches.

use sluice_core::domain::pipeline::{MemoryLimitExceeded, OnRecordError, PipelineConfiguration};
use sluice_core::domain::record::{Batch, Record};
use sluice_core::stage::{StageContext, StageError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::graph::ExecutableGraph;
use super::observer::ProductionObserver;
use super::snapshot::{CompletedCapture, SnapshotCapture};
use crate::error::{Result, RunnerError};
use crate::metrics::PipelineMetrics;
use crate::repository::{OffsetStore, SnapshotStore};
use crate::service::{AlertManager, ErrorRecordStore};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Share of the runtime's memory a single pipeline may be configured to use
pub const MAX_MEMORY_SHARE: f64 = 0.85;

/// Rule id of the alert raised under the `ALERT` memory policy
pub const MEMORY_ALERT_ID: &str = "memory_limit";

/// Memory limit of one run and what to do when it is exceeded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLimit {
    /// 0 disables the check
    pub limit_mb: u64,
    pub policy: MemoryLimitExceeded,
}

impl MemoryLimit {
    /// # Errors
    /// `ConfigInvalid` if the pipeline asks for more than 85% of the runtime's memory
    pub fn for_pipeline(config: &PipelineConfiguration, runtime_memory_mb: u64) -> Result<Self> {
        let ceiling = runtime_memory_mb as f64 * MAX_MEMORY_SHARE;
        if config.memory_limit_mb as f64 > ceiling {
            return Err(RunnerError::ConfigInvalid(format!(
                "memory limit of {} MB exceeds {:.0} MB ({}% of the runtime's {} MB)",
                config.memory_limit_mb,
                ceiling,
                (MAX_MEMORY_SHARE * 100.0) as u32,
                runtime_memory_mb
            )));
        }
        Ok(Self {
            limit_mb: config.memory_limit_mb,
            policy: config.memory_limit_exceeded,
        })
    }

    pub fn disabled() -> Self {
        Self {
            limit_mb: 0,
            policy: MemoryLimitExceeded::Log,
        }
    }
}

/// How a run's main loop ended
#[derive(Debug)]
pub enum RunOutcome {
    /// The source is exhausted
    Finished,
    /// The stop flag was raised
    Stopped,
    Failed(RunnerError),
}

/// Shared services the main loop reports to
#[derive(Clone)]
pub struct RunServices {
    pub offsets: Arc<dyn OffsetStore>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub metrics: Arc<PipelineMetrics>,
    pub observer: Arc<ProductionObserver>,
    pub errors: Arc<ErrorRecordStore>,
    pub alerts: Arc<AlertManager>,
    pub capture: Arc<SnapshotCapture>,
}

pub struct ProductionPipeline {
    name: String,
    rev: String,
    on_record_error: OnRecordError,
    max_batch_size: usize,
    memory: MemoryLimit,
    graph: ExecutableGraph,
    services: RunServices,
    stop: Arc<AtomicBool>,
}

/// Reports a stage failure on the error store and converts it
fn stage_failure(errors: &ErrorRecordStore, stage: &str, err: StageError) -> RunnerError {
    errors.report_error(stage, err.to_string());
    err.into()
}

/// Copies at most `size` records of a stage's output for snapshot capture
fn capture_copy(stage: &str, records: &[Record], size: usize) -> (String, Vec<Record>) {
    (
        stage.to_string(),
        records.iter().take(size).cloned().collect(),
    )
}

impl ProductionPipeline {
    pub fn new(
        config: &PipelineConfiguration,
        graph: ExecutableGraph,
        memory: MemoryLimit,
        services: RunServices,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            name: config.name.clone(),
            rev: config.rev.clone(),
            on_record_error: config.on_record_error,
            max_batch_size: config.max_batch_size.max(1),
            memory,
            graph,
            services,
            stop,
        }
    }

    /// Runs batches until the source is exhausted, the stop flag is raised or
    /// a stage fails
    pub async fn run(mut self) -> RunOutcome {
        info!("Pipeline '{}' main loop started", self.name);

        let outcome = loop {
            if self.stop.load(Ordering::SeqCst) {
                break RunOutcome::Stopped;
            }
            match self.run_batch().await {
                Ok(true) => {}
                Ok(false) => break RunOutcome::Finished,
                Err(e) => {
                    error!("Pipeline '{}' failed: {}", self.name, e);
                    break RunOutcome::Failed(e);
                }
            }
        };

        self.graph.destroy();
        info!("Pipeline '{}' main loop ended: {:?}", self.name, outcome);
        outcome
    }

    /// Runs one batch; returns `false` once the source is exhausted
    async fn run_batch(&mut self) -> Result<bool> {
        let started = Instant::now();
        let services = self.services.clone();
        let errors = services.errors.as_ref();
        let errors_before = errors.error_count();

        let offset = services.offsets.get_offset(&self.name, &self.rev)?;

        let source = &mut self.graph.source;
        let ctx = StageContext::new(&source.name, self.on_record_error, errors);
        let produced = source
            .stage
            .produce(offset.as_deref(), self.max_batch_size, ctx)
            .await
            .map_err(|e| stage_failure(errors, &source.name, e))?;
        let Some(mut batch) = produced else {
            debug!("Source '{}' of pipeline '{}' is exhausted", source.name, self.name);
            return Ok(false);
        };

        let input = batch.len();
        let new_offset = batch.source_offset.clone();
        services.metrics.record_stage(&source.name, 0, input);
        services.observer.observe(&source.name, &batch.records).await;

        let capture_size = services.capture.batch_size();
        let mut captured = Vec::new();
        if let Some(size) = capture_size {
            captured.push(capture_copy(&source.name, &batch.records, size));
        }

        for processor in &mut self.graph.processors {
            let ctx = StageContext::new(&processor.name, self.on_record_error, errors);
            let stage_input = batch.len();
            batch = processor
                .stage
                .process(batch, ctx)
                .map_err(|e| stage_failure(errors, &processor.name, e))?;

            services
                .metrics
                .record_stage(&processor.name, stage_input, batch.len());
            services.observer.observe(&processor.name, &batch.records).await;
            if let Some(size) = capture_size {
                captured.push(capture_copy(&processor.name, &batch.records, size));
            }
        }

        self.check_memory(&batch)?;

        for target in &mut self.graph.targets {
            let ctx = StageContext::new(&target.name, self.on_record_error, errors);
            target
                .stage
                .write(&batch, ctx)
                .await
                .map_err(|e| stage_failure(errors, &target.name, e))?;
            services
                .metrics
                .record_stage(&target.name, batch.len(), batch.len());
        }

        if let Some(offset) = &new_offset {
            services.offsets.commit_offset(&self.name, &self.rev, offset)?;
        }

        services.metrics.record_batch(
            input,
            batch.len(),
            errors.error_count().saturating_sub(errors_before),
            started.elapsed(),
        );

        if !captured.is_empty() {
            if let Some(done) = services.capture.record_batch(captured) {
                self.save_snapshot(done);
            }
        }
        Ok(true)
    }

    /// Estimates the in-flight batch's footprint as its serialized size
    fn check_memory(&self, batch: &Batch) -> Result<()> {
        let used_bytes = serde_json::to_vec(&batch.records)
            .map(|bytes| bytes.len() as u64)
            .unwrap_or(0);
        self.services.metrics.set_memory_usage(used_bytes);

        let limit_bytes = self.memory.limit_mb * BYTES_PER_MB;
        if limit_bytes == 0 || used_bytes <= limit_bytes {
            return Ok(());
        }

        let used_mb = used_bytes / BYTES_PER_MB;
        match self.memory.policy {
            MemoryLimitExceeded::Log => {
                warn!(
                    "Pipeline '{}' uses {} bytes, over its limit of {} MB",
                    self.name, used_bytes, self.memory.limit_mb
                );
                Ok(())
            }
            MemoryLimitExceeded::Alert => {
                self.services.alerts.raise(
                    &self.name,
                    MEMORY_ALERT_ID,
                    used_bytes as f64 / BYTES_PER_MB as f64,
                    self.memory.limit_mb as f64,
                );
                Ok(())
            }
            MemoryLimitExceeded::StopPipeline => Err(RunnerError::MemoryLimitExceeded {
                used_mb,
                limit_mb: self.memory.limit_mb,
            }),
        }
    }

    /// Saves a completed capture off the main loop
    fn save_snapshot(&self, done: CompletedCapture) {
        let store = self.services.snapshots.clone();
        let name = self.name.clone();
        let rev = self.rev.clone();
        tokio::task::spawn_blocking(move || {
            match store.save(&name, &rev, &done.id, done.batches) {
                Ok(_) => info!("Snapshot '{}' of pipeline '{}' captured", done.id, name),
                Err(e) => error!(
                    "Failed to save snapshot '{}' of pipeline '{}': {}",
                    done.id, name, e
                ),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::graph::NamedStage;
    use crate::repository::{InMemoryOffsetStore, InMemorySnapshotStore};
    use crate::scheduler::queue::work_queue;
    use crate::stages::{DevDataSource, FieldMergerProcessor};
    use async_trait::async_trait;
    use serde_json::json;
    use sluice_core::domain::pipeline::StageConfiguration;
    use sluice_core::stage::Target;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct CollectingTarget(Arc<Mutex<Vec<Batch>>>);

    #[async_trait]
    impl Target for CollectingTarget {
        async fn write(&mut self, batch: &Batch, _ctx: StageContext<'_>) -> std::result::Result<(), StageError> {
            self.0.lock().unwrap().push(batch.clone());
            Ok(())
        }
    }

    struct Fixture {
        services: RunServices,
        offsets: Arc<InMemoryOffsetStore>,
        snapshots: Arc<InMemorySnapshotStore>,
        target: CollectingTarget,
        stop: Arc<AtomicBool>,
    }

    fn fixture() -> Fixture {
        let offsets = Arc::new(InMemoryOffsetStore::new());
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let (sender, _receiver) = work_queue(10);
        Fixture {
            services: RunServices {
                offsets: offsets.clone(),
                snapshots: snapshots.clone(),
                metrics: Arc::new(PipelineMetrics::new()),
                observer: Arc::new(ProductionObserver::new(sender)),
                errors: Arc::new(ErrorRecordStore::new(10)),
                alerts: Arc::new(AlertManager::new()),
                capture: Arc::new(SnapshotCapture::new()),
            },
            offsets,
            snapshots,
            target: CollectingTarget::default(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    fn config(policy: OnRecordError) -> PipelineConfiguration {
        let mut config: PipelineConfiguration =
            serde_json::from_value(json!({ "name": "p", "stages": [] })).unwrap();
        config.on_record_error = policy;
        config
    }

    fn graph(fixture: &Fixture, source: serde_json::Value, merge: bool) -> ExecutableGraph {
        let source = StageConfiguration::new("origin", "dev_data", source);
        let mut graph = ExecutableGraph::new(NamedStage::new(
            "origin",
            Box::new(DevDataSource::from_stage(&source).unwrap()),
        ));
        if merge {
            let stage = StageConfiguration::new(
                "merge",
                "field_merger",
                json!({ "mappings": [{ "from": "/extra", "to": "/tags" }] }),
            );
            graph = graph.with_processor(NamedStage::new(
                "merge",
                Box::new(FieldMergerProcessor::from_stage(&stage).unwrap()),
            ));
        }
        graph.with_target(NamedStage::new("sink", Box::new(fixture.target.clone())))
    }

    #[tokio::test]
    async fn test_runs_until_source_is_exhausted() {
        let f = fixture();
        let graph = graph(&f, json!({ "limit": 5, "batch_size": 2 }), false);
        let pipeline = ProductionPipeline::new(
            &config(OnRecordError::ToError),
            graph,
            MemoryLimit::disabled(),
            f.services.clone(),
            f.stop.clone(),
        );

        assert!(matches!(pipeline.run().await, RunOutcome::Finished));

        let sizes: Vec<usize> = f.target.0.lock().unwrap().iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(f.offsets.get_offset("p", "0").unwrap().as_deref(), Some("5"));

        let metrics = f.services.metrics.snapshot();
        assert_eq!(metrics.batch_count, 3);
        assert_eq!(metrics.input_records, 5);
        assert_eq!(metrics.stages["sink"].input_records, 5);
    }

    #[tokio::test]
    async fn test_resumes_from_committed_offset() {
        let f = fixture();
        f.offsets.commit_offset("p", "0", "4").unwrap();
        let graph = graph(&f, json!({ "limit": 5 }), false);
        let pipeline = ProductionPipeline::new(
            &config(OnRecordError::ToError),
            graph,
            MemoryLimit::disabled(),
            f.services.clone(),
            f.stop.clone(),
        );

        pipeline.run().await;
        let batches = f.target.0.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].records[0].header.source_id, "4");
    }

    #[tokio::test]
    async fn test_stop_flag_is_checked_before_each_batch() {
        let f = fixture();
        f.stop.store(true, Ordering::SeqCst);
        let graph = graph(&f, json!({}), false);
        let pipeline = ProductionPipeline::new(
            &config(OnRecordError::ToError),
            graph,
            MemoryLimit::disabled(),
            f.services.clone(),
            f.stop.clone(),
        );

        assert!(matches!(pipeline.run().await, RunOutcome::Stopped));
        assert!(f.target.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_errors_follow_policy() {
        let f = fixture();
        let graph = graph(&f, json!({ "limit": 3, "fields": { "tags": [] } }), true);
        let pipeline = ProductionPipeline::new(
            &config(OnRecordError::ToError),
            graph,
            MemoryLimit::disabled(),
            f.services.clone(),
            f.stop.clone(),
        );

        assert!(matches!(pipeline.run().await, RunOutcome::Finished));
        assert_eq!(f.services.errors.get_error_records("merge", 10).len(), 3);
        assert_eq!(f.services.metrics.snapshot().error_records, 3);
        assert!(f.target.0.lock().unwrap()[0].is_empty());
    }

    #[tokio::test]
    async fn test_stop_pipeline_fails_run_without_commit() {
        let f = fixture();
        let graph = graph(&f, json!({ "limit": 3 }), true);
        let pipeline = ProductionPipeline::new(
            &config(OnRecordError::StopPipeline),
            graph,
            MemoryLimit::disabled(),
            f.services.clone(),
            f.stop.clone(),
        );

        let outcome = pipeline.run().await;
        assert!(matches!(
            outcome,
            RunOutcome::Failed(RunnerError::RecordDeliveryFailure { ref stage, .. }) if stage == "merge"
        ));
        assert!(f.offsets.get_offset("p", "0").unwrap().is_none());
        assert!(f.target.0.lock().unwrap().is_empty());
        assert_eq!(f.services.errors.get_error_messages("merge", 10).len(), 1);
    }

    #[test]
    fn test_memory_limit_share() {
        let mut config = config(OnRecordError::ToError);
        config.memory_limit_mb = 900;
        assert!(matches!(
            MemoryLimit::for_pipeline(&config, 1024),
            Err(RunnerError::ConfigInvalid(_))
        ));

        config.memory_limit_mb = 800;
        let limit = MemoryLimit::for_pipeline(&config, 1024).unwrap();
        assert_eq!(limit.limit_mb, 800);
    }

    #[tokio::test]
    async fn test_memory_policies() {
        let blob = "x".repeat(600_000);
        let source = json!({ "limit": 2, "batch_size": 2, "fields": { "blob": blob } });

        let f = fixture();
        let pipeline = ProductionPipeline::new(
            &config(OnRecordError::ToError),
            graph(&f, source.clone(), false),
            MemoryLimit { limit_mb: 1, policy: MemoryLimitExceeded::StopPipeline },
            f.services.clone(),
            f.stop.clone(),
        );
        assert!(matches!(
            pipeline.run().await,
            RunOutcome::Failed(RunnerError::MemoryLimitExceeded { limit_mb: 1, .. })
        ));

        let f = fixture();
        let pipeline = ProductionPipeline::new(
            &config(OnRecordError::ToError),
            graph(&f, source, false),
            MemoryLimit { limit_mb: 1, policy: MemoryLimitExceeded::Alert },
            f.services.clone(),
            f.stop.clone(),
        );
        assert!(matches!(pipeline.run().await, RunOutcome::Finished));
        assert_eq!(f.services.alerts.list()[0].rule_id, MEMORY_ALERT_ID);
    }

    #[tokio::test]
    async fn test_snapshot_capture_is_saved() {
        let f = fixture();
        f.snapshots.create("admin", "p", "0", "snap", "first").unwrap();
        f.services.capture.request("snap", 2, 1);

        let graph = graph(&f, json!({ "limit": 10, "batch_size": 3 }), false);
        let pipeline = ProductionPipeline::new(
            &config(OnRecordError::ToError),
            graph,
            MemoryLimit::disabled(),
            f.services.clone(),
            f.stop.clone(),
        );
        pipeline.run().await;

        let mut saved = None;
        for _ in 0..50 {
            saved = f.snapshots.get("p", "0", "snap").unwrap().filter(|s| !s.info.in_progress);
            if saved.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let snapshot = saved.unwrap();
        assert_eq!(snapshot.batches.len(), 2);
        assert_eq!(snapshot.batches[0][0].stage, "origin");
        assert_eq!(snapshot.batches[0][0].records.len(), 1);
    }
}
