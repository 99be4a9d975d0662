//! Standalone pipeline runner
//!
//! Façade over one pipeline revision: admission, the lifecycle state machine,
//! the per-run context and its main loop, snapshots, offsets and the
//! introspection queries. Every status change goes through the state machine;
//! the admission slot acquired by `prepare_for_start` is released exactly once,
//! whichever way the run ends. `start`, `stop` and `on_process_stop` are
//! serialized, so a stop never observes a half-launched run.

use sluice_client::UpdateClient;
use sluice_core::domain::alert::AlertInfo;
use sluice_core::domain::record::Record;
use sluice_core::domain::snapshot::{Snapshot, SnapshotInfo};
use sluice_core::domain::state::{ExecutionMode, PipelineState};
use sluice_core::domain::status::PipelineStatus;
use sluice_core::dto::update::{UpdateCheckRequest, UpdateInfo};
use std::sync::atomic::{AtomicBool, Ordering};
use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::RunnerConfig;
use crate::context::RunContext;
use crate::error::{Result, RunnerError};
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::pipeline::{
    MemoryLimit, ProductionObserver, ProductionPipeline, RunOutcome, RunServices,
    SnapshotCapture, StageGraphBuilder,
};
use crate::repository::{OffsetStore, PipelineStore, SnapshotStore, StateStore, StoreError};
use crate::scheduler::{
    DataRuleObserver, MetricRuleObserver, MetricsEmitter, RulesConfigLoader, UpdateChecker,
    WorkerSet, work_queue,
};
use crate::service::{
    AlertManager, ErrorMessage, ErrorRecordStore, EventListenerManager, LifecycleStateMachine,
    ResourceManager,
};

const MODE: ExecutionMode = ExecutionMode::Standalone;

/// Collaborators shared between runners of the same process
#[derive(Clone)]
pub struct RunnerServices {
    pub states: Arc<dyn StateStore>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub offsets: Arc<dyn OffsetStore>,
    pub pipelines: Arc<dyn PipelineStore>,
    pub builder: Arc<dyn StageGraphBuilder>,
    pub resources: Arc<ResourceManager>,
    pub listeners: Arc<EventListenerManager>,
}

pub struct StandaloneRunner {
    name: String,
    rev: String,
    user: String,
    config: RunnerConfig,
    services: RunnerServices,
    state_machine: Arc<LifecycleStateMachine>,
    alerts: Arc<AlertManager>,
    capture: Arc<SnapshotCapture>,
    update_info: Arc<RwLock<UpdateInfo>>,
    run: Mutex<Option<RunContext>>,
    lifecycle: AsyncMutex<()>,
    token: Mutex<Option<String>>,
    slot_held: AtomicBool,
    recovered: AtomicBool,
    closed: AtomicBool,
}

/// Runs the main loop on its own task; a panic in a stage ends the run as a
/// failure
async fn supervise(main_loop: ProductionPipeline) -> RunOutcome {
    match tokio::spawn(main_loop.run()).await {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => RunOutcome::Failed(RunnerError::MainLoopAborted(format!(
            "panicked: {}",
            panic_message(e.into_panic())
        ))),
        Err(e) => RunOutcome::Failed(RunnerError::MainLoopAborted(e.to_string())),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown cause".to_string()),
    }
}

impl StandaloneRunner {
    /// Creates the runner of one pipeline revision
    ///
    /// A pipeline without any saved state starts out EDITED.
    ///
    /// # Errors
    /// Returns an error if the state store cannot be read or written
    pub fn new(
        name: impl Into<String>,
        rev: impl Into<String>,
        config: RunnerConfig,
        services: RunnerServices,
    ) -> Result<Arc<Self>> {
        let name = name.into();
        let rev = rev.into();

        match services.states.get_state(&name, &rev) {
            Ok(_) => {}
            Err(StoreError::NotFound(_)) => {
                services
                    .states
                    .save_state(&PipelineState::edited(&config.user, &name, &rev))?;
            }
            Err(e) => return Err(e.into()),
        }

        let state_machine = Arc::new(LifecycleStateMachine::new(
            &name,
            &rev,
            services.states.clone(),
            services.listeners.clone(),
        ));

        Ok(Arc::new(Self {
            user: config.user.clone(),
            name,
            rev,
            config,
            services,
            state_machine,
            alerts: Arc::new(AlertManager::new()),
            capture: Arc::new(SnapshotCapture::new()),
            update_info: Arc::new(RwLock::new(UpdateInfo::default())),
            run: Mutex::new(None),
            lifecycle: AsyncMutex::new(()),
            token: Mutex::new(None),
            slot_held: AtomicBool::new(false),
            recovered: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rev(&self) -> &str {
        &self.rev
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RunnerError::AlreadyClosed);
        }
        Ok(())
    }

    fn run_context(&self) -> MutexGuard<'_, Option<RunContext>> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, to: PipelineStatus, message: Option<String>) -> Result<PipelineState> {
        self.state_machine
            .request_transition(&self.user, to, message, None)
    }

    /// Walks `statuses` in order, stopping at the first refused transition
    fn transition_chain(&self, statuses: &[PipelineStatus], message: Option<String>) {
        for &status in statuses {
            if let Err(e) = self.transition(status, message.clone()) {
                error!(
                    "Pipeline '{}' could not move to {}: {}",
                    self.name, status, e
                );
                return;
            }
        }
    }

    fn release_slot(&self) {
        if self.slot_held.swap(false, Ordering::SeqCst) {
            self.services.resources.release(MODE);
        }
    }

    /// Claims an admission slot and moves the pipeline to STARTING
    ///
    /// # Errors
    /// - `AlreadyClosed` if the runner was closed
    /// - `InvalidState` until `prepare_for_process_start` has run
    /// - `ResourceExhausted` if no slot is left; the state is untouched
    /// - `IllegalTransition` if the pipeline cannot start from its status
    pub fn prepare_for_start(&self) -> Result<PipelineState> {
        self.ensure_open()?;
        if !self.recovered.load(Ordering::SeqCst) {
            return Err(RunnerError::InvalidState(format!(
                "pipeline '{}' has not been recovered since the process started",
                self.name
            )));
        }
        if !self.services.resources.acquire(MODE) {
            warn!("No {} slot left to start pipeline '{}'", MODE, self.name);
            return Err(RunnerError::ResourceExhausted(MODE));
        }

        match self.transition(PipelineStatus::Starting, None) {
            Ok(state) => {
                self.slot_held.store(true, Ordering::SeqCst);
                *self.token.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(Uuid::new_v4().to_string());
                Ok(state)
            }
            Err(e) => {
                self.services.resources.release(MODE);
                Err(e)
            }
        }
    }

    /// Builds the run and moves the pipeline from STARTING to RUNNING
    ///
    /// # Errors
    /// `InvalidState` unless the pipeline is STARTING. Any failure while
    /// launching moves the pipeline to START_ERROR, releases the slot and is
    /// returned.
    pub async fn start(self: &Arc<Self>) -> Result<PipelineState> {
        self.ensure_open()?;
        let _lifecycle = self.lifecycle.lock().await;
        let status = self.state_machine.status()?;
        if status != PipelineStatus::Starting {
            return Err(RunnerError::InvalidState(format!(
                "pipeline '{}' must be {} to start, it is {}",
                self.name,
                PipelineStatus::Starting,
                status
            )));
        }

        match self.launch().await {
            Ok(state) => Ok(state),
            Err(e) => {
                error!("Failed to start pipeline '{}': {}", self.name, e);
                self.state_machine.set_metrics(None);
                let to = match self.state_machine.status() {
                    Ok(PipelineStatus::Stopping) => PipelineStatus::Stopped,
                    _ => PipelineStatus::StartError,
                };
                if let Err(t) = self.transition(to, Some(e.to_string())) {
                    error!("Pipeline '{}' could not move to {}: {}", self.name, to, t);
                }
                self.release_slot();
                Err(e)
            }
        }
    }

    async fn launch(self: &Arc<Self>) -> Result<PipelineState> {
        let pipeline = self.services.pipelines.load(&self.name, &self.rev)?;
        let memory = MemoryLimit::for_pipeline(&pipeline, self.config.runtime_memory_mb)?;
        let graph = self.services.builder.build(&pipeline)?;

        let metrics = Arc::new(PipelineMetrics::new());
        let errors = Arc::new(ErrorRecordStore::new(self.config.max_error_records_per_stage));
        let (sender, receiver) = work_queue(self.config.observer_queue_size);
        let observer = Arc::new(ProductionObserver::new(sender));
        let data_observer = Arc::new(DataRuleObserver::new(
            &self.name,
            self.config.max_samples_per_rule,
            self.alerts.clone(),
        ));

        self.alerts.clear_all();
        let mut workers = WorkerSet::new();
        workers.spawn("data-rule-observer", data_observer.clone().run(receiver));

        let loader = Arc::new(RulesConfigLoader::new(
            &self.name,
            &self.rev,
            self.services.pipelines.clone(),
            observer.clone(),
        ));
        loader.load().await?;
        workers.spawn_fixed_delay(loader, self.config.rules_reload_delay);

        workers.spawn_fixed_delay(
            Arc::new(MetricRuleObserver::new(
                &self.name,
                metrics.clone(),
                observer.clone(),
                self.alerts.clone(),
            )),
            self.config.metric_observer_delay,
        );

        if !self.config.metrics_refresh_interval.is_zero() {
            workers.spawn_fixed_rate(
                Arc::new(MetricsEmitter::new(
                    &self.name,
                    metrics.clone(),
                    self.state_machine.clone(),
                    self.services.listeners.clone(),
                )),
                self.config.metrics_refresh_interval,
            );
        }

        let request = UpdateCheckRequest {
            runner_id: self.config.runner_id.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            stage_types: pipeline
                .stages
                .iter()
                .map(|s| s.stage_type.clone())
                .collect(),
        };
        workers.spawn_fixed_rate(
            Arc::new(UpdateChecker::new(
                self.config.update_check_url.as_deref().map(UpdateClient::new),
                request,
                self.update_info.clone(),
            )),
            self.config.update_check_interval,
        );

        let stop = Arc::new(AtomicBool::new(false));
        let main_loop = ProductionPipeline::new(
            &pipeline,
            graph,
            memory,
            RunServices {
                offsets: self.services.offsets.clone(),
                snapshots: self.services.snapshots.clone(),
                metrics: metrics.clone(),
                observer,
                errors: errors.clone(),
                alerts: self.alerts.clone(),
                capture: self.capture.clone(),
            },
            stop.clone(),
        );

        let worker_count = workers.len();
        self.state_machine.set_metrics(Some(metrics.clone()));
        *self.run_context() = Some(RunContext::new(metrics, errors, data_observer, workers, stop));

        let state = match self.transition(PipelineStatus::Running, None) {
            Ok(state) => state,
            Err(e) => {
                if let Some(mut ctx) = self.run_context().take() {
                    ctx.shutdown();
                }
                return Err(e);
            }
        };

        let runner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let outcome = supervise(main_loop).await;
            runner.finish_run(outcome);
        });
        if let Some(ctx) = self.run_context().as_mut() {
            ctx.set_handle(handle);
        }

        info!(
            "Pipeline '{}' rev '{}' running with {} worker(s)",
            self.name, self.rev, worker_count
        );
        Ok(state)
    }

    /// Tears the run down once its main loop has exited
    fn finish_run(&self, outcome: RunOutcome) {
        if let Some(mut ctx) = self.run_context().take() {
            ctx.shutdown();
        }
        if let Some(id) = self.capture.abandon() {
            warn!("Snapshot '{}' of pipeline '{}' abandoned", id, self.name);
            if let Err(e) = self.services.snapshots.delete_snapshot(&self.name, &self.rev, &id) {
                warn!("Failed to delete snapshot '{}': {}", id, e);
            }
        }

        let status = match self.state_machine.status() {
            Ok(status) => status,
            Err(e) => {
                error!("Cannot read status of pipeline '{}': {}", self.name, e);
                self.release_slot();
                return;
            }
        };

        use PipelineStatus::*;
        match (status, outcome) {
            (Stopping, _) => self.transition_chain(&[Stopped], None),
            (Disconnecting, _) => self.transition_chain(&[Disconnected], None),
            (Starting | Running, RunOutcome::Finished) => {
                self.transition_chain(&[Finishing, Finished], None)
            }
            (Starting | Running, RunOutcome::Failed(e)) => {
                self.transition_chain(&[RunningError, RunError], Some(e.to_string()))
            }
            (Starting | Running, RunOutcome::Stopped) => {
                self.transition_chain(&[Stopping, Stopped], None)
            }
            (other, outcome) => warn!(
                "Pipeline '{}' ended ({:?}) while {}",
                self.name, outcome, other
            ),
        }

        self.release_slot();
        self.state_machine.set_metrics(None);
    }

    /// Stops the main loop and waits for the in-flight batch
    async fn halt(&self) {
        let handle = self.run_context().as_mut().and_then(RunContext::signal_stop);
        match handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    error!("Main loop of pipeline '{}' did not exit cleanly: {}", self.name, e);
                    self.finish_run(RunOutcome::Stopped);
                }
            }
            None => self.finish_run(RunOutcome::Stopped),
        }
    }

    /// Stops a run: STOPPING, wait for the in-flight batch, STOPPED
    ///
    /// # Errors
    /// `IllegalTransition` if the pipeline cannot be stopped from its status
    pub async fn stop(&self) -> Result<PipelineState> {
        self.ensure_open()?;
        let _lifecycle = self.lifecycle.lock().await;
        self.transition(PipelineStatus::Stopping, None)?;
        self.halt().await;
        self.state_machine.current()
    }

    /// Best-effort stop on process shutdown, leaving the pipeline DISCONNECTED
    /// so the next process start resumes it
    pub async fn on_process_stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let status = match self.state_machine.status() {
            Ok(status) => status,
            Err(e) => {
                error!("Cannot read status of pipeline '{}': {}", self.name, e);
                return;
            }
        };
        if !matches!(
            status,
            PipelineStatus::Starting | PipelineStatus::Running | PipelineStatus::Connecting
        ) {
            return;
        }

        info!("Disconnecting pipeline '{}' on shutdown", self.name);
        if let Err(e) = self.transition(PipelineStatus::Disconnecting, None) {
            error!("Failed to disconnect pipeline '{}': {}", self.name, e);
            return;
        }
        self.halt().await;
    }

    /// Moves a pipeline left in a transient status by a crashed process to
    /// the status it would have ended in
    ///
    /// Must run once before the runner accepts a start request.
    pub fn prepare_for_process_start(&self) -> Result<PipelineState> {
        use PipelineStatus::*;
        let status = self.state_machine.status()?;
        let chain: &[PipelineStatus] = match status {
            Starting | Connecting | Running => &[Disconnecting, Disconnected],
            Disconnecting => &[Disconnected],
            RunningError => &[RunError],
            Stopping => &[Stopped],
            Finishing => &[Finished],
            _ => &[],
        };
        if !chain.is_empty() {
            info!("Recovering pipeline '{}' from {}", self.name, status);
            self.transition_chain(chain, None);
        }
        self.recovered.store(true, Ordering::SeqCst);
        self.state_machine.current()
    }

    /// Resumes a pipeline that was running when the previous process stopped
    ///
    /// In-progress snapshots of the previous process are discarded.
    pub async fn on_process_start(self: &Arc<Self>) -> Result<PipelineState> {
        self.ensure_open()?;
        for snapshot in self.get_snapshots_info()? {
            if snapshot.in_progress {
                self.services
                    .snapshots
                    .delete_snapshot(&self.name, &self.rev, &snapshot.id)?;
            }
        }

        if self.state_machine.status()? != PipelineStatus::Disconnected {
            return self.state_machine.current();
        }

        self.transition(PipelineStatus::Connecting, None)?;
        if let Err(e) = self.prepare_for_start() {
            warn!("Cannot resume pipeline '{}': {}", self.name, e);
            self.transition_chain(
                &[PipelineStatus::Disconnecting, PipelineStatus::Disconnected],
                Some(e.to_string()),
            );
            return Err(e);
        }
        self.start().await
    }

    /// Requests a capture of the next `batches` batches
    ///
    /// `batch_size` is clamped to the configured maximum.
    ///
    /// # Errors
    /// - `InvalidState` unless RUNNING, or while another capture is in progress
    /// - `InvalidArgument` if `batch_size <= 0` or `batches == 0`
    pub fn capture_snapshot(&self, label: &str, batches: usize, batch_size: i64) -> Result<String> {
        self.ensure_open()?;
        let status = self.state_machine.status()?;
        if status != PipelineStatus::Running {
            return Err(RunnerError::InvalidState(format!(
                "cannot capture a snapshot of pipeline '{}' while {}",
                self.name, status
            )));
        }
        if batch_size <= 0 {
            return Err(RunnerError::InvalidArgument(format!(
                "batch size must be greater than 0, got {}",
                batch_size
            )));
        }
        if batches == 0 {
            return Err(RunnerError::InvalidArgument(
                "at least one batch must be captured".to_string(),
            ));
        }
        if self.capture.is_active() {
            return Err(RunnerError::InvalidState(
                "a snapshot capture is already in progress".to_string(),
            ));
        }

        let batch_size = usize::try_from(batch_size)
            .unwrap_or(usize::MAX)
            .min(self.config.snapshot_max_batch_size);
        let id = Uuid::new_v4().to_string();
        self.services
            .snapshots
            .create(&self.user, &self.name, &self.rev, &id, label)?;

        if !self.capture.request(&id, batches, batch_size) {
            self.services
                .snapshots
                .delete_snapshot(&self.name, &self.rev, &id)?;
            return Err(RunnerError::InvalidState(
                "a snapshot capture is already in progress".to_string(),
            ));
        }
        info!(
            "Capturing snapshot '{}' of pipeline '{}' ({} batch(es) of {})",
            id, self.name, batches, batch_size
        );
        Ok(id)
    }

    pub fn get_snapshot(&self, id: &str) -> Result<Option<Snapshot>> {
        Ok(self.services.snapshots.get(&self.name, &self.rev, id)?)
    }

    pub fn get_snapshots_info(&self) -> Result<Vec<SnapshotInfo>> {
        Ok(self
            .services
            .snapshots
            .get_summary_for_pipeline(&self.name, &self.rev)?)
    }

    /// Deletes a snapshot, cancelling its capture if still in progress
    pub fn delete_snapshot(&self, id: &str) -> Result<()> {
        if self.capture.cancel(id) {
            info!("Cancelled capture of snapshot '{}'", id);
        }
        Ok(self
            .services
            .snapshots
            .delete_snapshot(&self.name, &self.rev, id)?)
    }

    /// Forgets the committed source offset
    ///
    /// # Errors
    /// `InvalidState` while the pipeline is RUNNING
    pub fn reset_offset(&self) -> Result<()> {
        self.ensure_open()?;
        let status = self.state_machine.status()?;
        if status == PipelineStatus::Running {
            return Err(RunnerError::InvalidState(format!(
                "cannot reset the offset of pipeline '{}' while {}",
                self.name, status
            )));
        }
        self.services.offsets.reset_offset(&self.name, &self.rev)?;
        info!("Offset of pipeline '{}' reset", self.name);
        Ok(())
    }

    pub fn get_state(&self) -> Result<PipelineState> {
        self.state_machine.current()
    }

    pub fn get_history(&self) -> Result<Vec<PipelineState>> {
        Ok(self.services.states.get_history(&self.name, &self.rev)?)
    }

    pub fn delete_history(&self) -> Result<()> {
        Ok(self.services.states.delete_history(&self.name, &self.rev)?)
    }

    /// Live metrics of the active run, or those saved on the current state
    pub fn get_metrics(&self) -> Result<Option<MetricsSnapshot>> {
        if let Some(ctx) = self.run_context().as_ref() {
            return Ok(Some(ctx.metrics.snapshot()));
        }
        let Some(json) = self.state_machine.current()?.metrics else {
            return Ok(None);
        };
        match serde_json::from_str(&json) {
            Ok(metrics) => Ok(Some(metrics)),
            Err(e) => {
                warn!("Saved metrics of pipeline '{}' are unreadable: {}", self.name, e);
                Ok(None)
            }
        }
    }

    fn with_active_run<T>(&self, f: impl FnOnce(&RunContext) -> T) -> Result<T> {
        self.run_context()
            .as_ref()
            .map(f)
            .ok_or_else(|| {
                RunnerError::InvalidState(format!("pipeline '{}' has no active run", self.name))
            })
    }

    pub fn get_error_records(&self, stage: &str, max: usize) -> Result<Vec<Record>> {
        self.with_active_run(|ctx| ctx.errors.get_error_records(stage, max))
    }

    pub fn get_error_messages(&self, stage: &str, max: usize) -> Result<Vec<ErrorMessage>> {
        self.with_active_run(|ctx| ctx.errors.get_error_messages(stage, max))
    }

    pub fn get_sampled_records(&self, rule_id: &str, max: usize) -> Result<Vec<Record>> {
        self.with_active_run(|ctx| ctx.data_observer.get_sampled_records(rule_id, max))
    }

    pub fn get_alerts(&self) -> Vec<AlertInfo> {
        self.alerts.list()
    }

    /// Clears a raised alert; returns `false` if none was raised for `rule_id`
    pub fn delete_alert(&self, rule_id: &str) -> bool {
        self.alerts.clear(rule_id)
    }

    pub fn get_update_info(&self) -> UpdateInfo {
        self.update_info
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Token of the latest run, issued by `prepare_for_start`
    pub fn get_token(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Refuses further lifecycle operations; an active run keeps going until
    /// stopped by the process shutdown
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("Runner of pipeline '{}' closed", self.name);
        }
    }
}
