//! Sluice Runner binary
//!
//! Runs the pipeline definition named by `SLUICE_PIPELINE_FILE` until it
//! ends on its own or the process receives Ctrl-C.

use anyhow::{Context, Result, bail};
use sluice_core::domain::pipeline::PipelineConfiguration;
use sluice_core::domain::status::PipelineStatus;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sluice_runner::pipeline::ConfigGraphBuilder;
use sluice_runner::repository::{
    InMemoryOffsetStore, InMemoryPipelineStore, InMemorySnapshotStore, InMemoryStateStore,
};
use sluice_runner::service::{EventListenerManager, ResourceManager};
use sluice_runner::{RunnerConfig, RunnerServices, StandaloneRunner};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sluice_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Sluice Runner");

    let config = load_config()?;
    info!(
        "Loaded configuration: runner_id={}, max_standalone_runs={}",
        config.runner_id, config.max_standalone_runs
    );

    let Some(path) = config.pipeline_file.clone() else {
        bail!("SLUICE_PIPELINE_FILE is not set");
    };
    let pipeline = load_pipeline(&path)?;
    let (name, rev) = (pipeline.name.clone(), pipeline.rev.clone());
    info!(
        "Loaded pipeline '{}' rev '{}' with {} stage(s)",
        name,
        rev,
        pipeline.stages.len()
    );

    let pipelines = Arc::new(InMemoryPipelineStore::new());
    pipelines.save_pipeline(pipeline);

    let services = RunnerServices {
        states: Arc::new(InMemoryStateStore::new()),
        snapshots: Arc::new(InMemorySnapshotStore::new()),
        offsets: Arc::new(InMemoryOffsetStore::new()),
        pipelines,
        builder: Arc::new(ConfigGraphBuilder::new()),
        resources: Arc::new(ResourceManager::new(
            config.max_standalone_runs,
            config.max_cluster_runs,
        )),
        listeners: Arc::new(EventListenerManager::new()),
    };

    let runner = StandaloneRunner::new(name, rev, config, services)?;
    runner
        .prepare_for_process_start()
        .context("Failed to recover pipeline state")?;

    let state = runner.on_process_start().await?;
    if !state.status.is_active() {
        runner.prepare_for_start()?;
        runner.start().await?;
    }

    let mut poll = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Shutdown requested");
                runner.on_process_stop().await;
                break;
            }
            _ = poll.tick() => {
                let status = runner.get_state()?.status;
                if !status.is_active() {
                    if status == PipelineStatus::RunError {
                        error!(
                            "Pipeline '{}' failed: {}",
                            runner.name(),
                            runner.get_state()?.message.unwrap_or_default()
                        );
                    }
                    info!("Pipeline '{}' ended in {}", runner.name(), status);
                    break;
                }
            }
        }
    }

    runner.close();
    Ok(())
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<RunnerConfig> {
    match RunnerConfig::from_env() {
        Ok(config) => {
            config.validate()?;
            Ok(config)
        }
        Err(e) => {
            info!("Failed to load config from environment ({}), using defaults", e);
            let config = RunnerConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

fn load_pipeline(path: &Path) -> Result<PipelineConfiguration> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse pipeline file {}", path.display()))
}
