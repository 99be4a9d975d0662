//! Pipeline configuration domain types

use serde::{Deserialize, Serialize};

/// What a stage does with a record it cannot process or deliver
///
/// A single pipeline-wide value, not chosen per record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnRecordError {
    /// Drop the record silently
    Discard,
    /// Route the record to the error sink and keep going
    #[default]
    ToError,
    /// Abort the batch and fail the pipeline
    StopPipeline,
}

/// What happens when a run exceeds its configured memory limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemoryLimitExceeded {
    #[default]
    Log,
    Alert,
    StopPipeline,
}

/// Pipeline definition as consumed by the runner
///
/// Stages are listed in topological order: exactly one source first, then
/// processors in the order they apply, then targets, which all receive the
/// output of the last processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfiguration {
    pub name: String,
    #[serde(default = "default_rev")]
    pub rev: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub on_record_error: OnRecordError,
    /// Memory limit in MB; 0 disables the check
    #[serde(default)]
    pub memory_limit_mb: u64,
    #[serde(default)]
    pub memory_limit_exceeded: MemoryLimitExceeded,
    /// Upper bound on records requested from the source per batch
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    pub stages: Vec<StageConfiguration>,
}

fn default_rev() -> String {
    "0".to_string()
}

fn default_max_batch_size() -> usize {
    1000
}

/// One node of the pipeline graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfiguration {
    /// Unique name of this stage within the pipeline
    pub instance_name: String,
    /// Identifier of the stage implementation (e.g. `dev_data`, `ipc`)
    pub stage_type: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl StageConfiguration {
    pub fn new(
        instance_name: impl Into<String>,
        stage_type: impl Into<String>,
        config: serde_json::Value,
    ) -> Self {
        Self {
            instance_name: instance_name.into(),
            stage_type: stage_type.into(),
            config,
        }
    }
}
