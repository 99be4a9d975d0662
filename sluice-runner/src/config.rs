//! Runner configuration
//!
//! Defines all tunable parameters of the runner: queue sizing, worker
//! schedules, retention limits for introspection data, admission limits and
//! the update check endpoint.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Anonymous identifier reported to the update service
    pub runner_id: String,

    /// User recorded on state transitions issued by the runner itself
    pub user: String,

    /// Capacity of the per-run observer queue
    pub observer_queue_size: usize,

    /// Upper bound for the batch size of a snapshot capture
    pub snapshot_max_batch_size: usize,

    /// How often metrics are pushed to metrics listeners; zero disables
    pub metrics_refresh_interval: Duration,

    /// Delay between two polls of the rules store
    pub rules_reload_delay: Duration,

    /// Delay between two metric rule evaluations
    pub metric_observer_delay: Duration,

    /// How often the update service is queried
    pub update_check_interval: Duration,

    /// Update service endpoint; no checks are made when unset
    pub update_check_url: Option<String>,

    /// Sampled records kept per data rule
    pub max_samples_per_rule: usize,

    /// Error records and messages kept per stage
    pub max_error_records_per_stage: usize,

    /// Maximum concurrent standalone runs
    pub max_standalone_runs: usize,

    /// Maximum concurrent cluster runs
    pub max_cluster_runs: usize,

    /// Memory available to pipeline runs, in MB
    pub runtime_memory_mb: u64,

    /// Pipeline definition loaded by the binary
    pub pipeline_file: Option<PathBuf>,
}

impl RunnerConfig {
    /// Creates a new configuration with defaults
    pub fn new(runner_id: String) -> Self {
        Self {
            runner_id,
            user: "admin".to_string(),
            observer_queue_size: 100,
            snapshot_max_batch_size: 10,
            metrics_refresh_interval: Duration::from_millis(2000),
            rules_reload_delay: Duration::from_secs(1),
            metric_observer_delay: Duration::from_secs(2),
            update_check_interval: Duration::from_secs(24 * 60 * 60),
            update_check_url: None,
            max_samples_per_rule: 100,
            max_error_records_per_stage: 100,
            max_standalone_runs: 10,
            max_cluster_runs: 10,
            runtime_memory_mb: 1024,
            pipeline_file: None,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Every variable is optional and falls back to the default:
    /// - SLUICE_RUNNER_ID (default: random UUID)
    /// - SLUICE_USER (default: admin)
    /// - SLUICE_OBSERVER_QUEUE_SIZE (default: 100)
    /// - SLUICE_SNAPSHOT_MAX_BATCH_SIZE (default: 10)
    /// - SLUICE_METRICS_REFRESH_MS (default: 2000, 0 disables)
    /// - SLUICE_RULES_RELOAD_MS (default: 1000)
    /// - SLUICE_METRIC_OBSERVER_MS (default: 2000)
    /// - SLUICE_UPDATE_CHECK_INTERVAL_SECS (default: 86400)
    /// - SLUICE_UPDATE_CHECK_URL (default: unset)
    /// - SLUICE_MAX_SAMPLES_PER_RULE (default: 100)
    /// - SLUICE_MAX_ERROR_RECORDS_PER_STAGE (default: 100)
    /// - SLUICE_MAX_STANDALONE_RUNS (default: 10)
    /// - SLUICE_MAX_CLUSTER_RUNS (default: 10)
    /// - SLUICE_RUNTIME_MEMORY_MB (default: 1024)
    /// - SLUICE_PIPELINE_FILE (default: unset)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            runner_id: std::env::var("SLUICE_RUNNER_ID").unwrap_or(defaults.runner_id),
            user: std::env::var("SLUICE_USER").unwrap_or(defaults.user),
            observer_queue_size: env_or("SLUICE_OBSERVER_QUEUE_SIZE", defaults.observer_queue_size)?,
            snapshot_max_batch_size: env_or(
                "SLUICE_SNAPSHOT_MAX_BATCH_SIZE",
                defaults.snapshot_max_batch_size,
            )?,
            metrics_refresh_interval: env_or("SLUICE_METRICS_REFRESH_MS", 2000)
                .map(Duration::from_millis)?,
            rules_reload_delay: env_or("SLUICE_RULES_RELOAD_MS", 1000).map(Duration::from_millis)?,
            metric_observer_delay: env_or("SLUICE_METRIC_OBSERVER_MS", 2000)
                .map(Duration::from_millis)?,
            update_check_interval: env_or("SLUICE_UPDATE_CHECK_INTERVAL_SECS", 24 * 60 * 60)
                .map(Duration::from_secs)?,
            update_check_url: std::env::var("SLUICE_UPDATE_CHECK_URL").ok(),
            max_samples_per_rule: env_or(
                "SLUICE_MAX_SAMPLES_PER_RULE",
                defaults.max_samples_per_rule,
            )?,
            max_error_records_per_stage: env_or(
                "SLUICE_MAX_ERROR_RECORDS_PER_STAGE",
                defaults.max_error_records_per_stage,
            )?,
            max_standalone_runs: env_or("SLUICE_MAX_STANDALONE_RUNS", defaults.max_standalone_runs)?,
            max_cluster_runs: env_or("SLUICE_MAX_CLUSTER_RUNS", defaults.max_cluster_runs)?,
            runtime_memory_mb: env_or("SLUICE_RUNTIME_MEMORY_MB", defaults.runtime_memory_mb)?,
            pipeline_file: std::env::var("SLUICE_PIPELINE_FILE").ok().map(PathBuf::from),
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.user.is_empty() {
            anyhow::bail!("user cannot be empty");
        }

        if self.observer_queue_size == 0 {
            anyhow::bail!("observer_queue_size must be greater than 0");
        }

        if self.snapshot_max_batch_size == 0 {
            anyhow::bail!("snapshot_max_batch_size must be greater than 0");
        }

        if self.rules_reload_delay.is_zero() || self.metric_observer_delay.is_zero() {
            anyhow::bail!("worker delays must be greater than 0");
        }

        if self.update_check_interval.is_zero() {
            anyhow::bail!("update_check_interval must be greater than 0");
        }

        if let Some(url) = &self.update_check_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("update_check_url must start with http:// or https://");
            }
        }

        if self.max_samples_per_rule == 0 || self.max_error_records_per_stage == 0 {
            anyhow::bail!("retention limits must be greater than 0");
        }

        if self.runtime_memory_mb == 0 {
            anyhow::bail!("runtime_memory_mb must be greater than 0");
        }

        Ok(())
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }
}

/// Parses an optional environment variable, failing on malformed values
fn env_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} has an invalid value '{}': {}", name, raw, e)),
        Err(_) => Ok(default),
    }
}
