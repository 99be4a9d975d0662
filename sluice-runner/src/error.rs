//! Runner error types

use sluice_core::domain::state::ExecutionMode;
use sluice_core::domain::status::PipelineStatus;
use sluice_core::stage::StageError;
use thiserror::Error;

use crate::repository::StoreError;

/// Result type alias for runner operations
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Errors surfaced by the pipeline runner
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The requested status change is not in the transition table
    #[error("illegal transition from {from} to {to}")]
    IllegalTransition {
        from: PipelineStatus,
        to: PipelineStatus,
    },

    /// No admission slot is left for this execution mode
    #[error("no {0} run slot available")]
    ResourceExhausted(ExecutionMode),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The stage graph could not be built from the pipeline definition
    #[error("failed to build pipeline: {0}")]
    RunnerBuildFailure(String),

    #[error("record '{record_id}' could not be handled by stage '{stage}' ({error_code}): {cause}")]
    RecordDeliveryFailure {
        stage: String,
        record_id: String,
        error_code: String,
        cause: String,
    },

    #[error("stage '{stage}' failed to deliver a batch after {attempts} attempt(s): {cause}")]
    BatchDeliveryFailure {
        stage: String,
        attempts: u32,
        cause: String,
    },

    /// A run exceeded its memory limit under the `STOP_PIPELINE` policy
    #[error("memory usage of {used_mb} MB exceeds the limit of {limit_mb} MB")]
    MemoryLimitExceeded { used_mb: u64, limit_mb: u64 },

    /// The operation is not allowed in the pipeline's current status
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The main loop ended abnormally, e.g. a stage panicked
    #[error("main loop aborted: {0}")]
    MainLoopAborted(String),

    #[error("runner is closed")]
    AlreadyClosed,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Stage(StageError),
}

impl From<StageError> for RunnerError {
    fn from(err: StageError) -> Self {
        match err {
            StageError::RecordDelivery {
                stage,
                record_id,
                error_code,
                cause,
            } => RunnerError::RecordDeliveryFailure {
                stage,
                record_id,
                error_code,
                cause,
            },
            StageError::BatchDelivery {
                stage,
                attempts,
                cause,
            } => RunnerError::BatchDeliveryFailure {
                stage,
                attempts,
                cause,
            },
            other => RunnerError::Stage(other),
        }
    }
}
