//! Repository layer
//!
//! Stores the runner depends on: pipeline state history, snapshots, source
//! offsets and pipeline definitions with their rules. Persistence is out of
//! the runner's hands, so every store is a trait; the in-memory
//! implementations back tests and the bundled binary.

mod offset_store;
mod pipeline_store;
mod snapshot_store;
mod state_store;

use thiserror::Error;

// Re-export traits
pub use offset_store::OffsetStore;
pub use pipeline_store::PipelineStore;
pub use snapshot_store::SnapshotStore;
pub use state_store::StateStore;

// Re-export implementations
pub use offset_store::InMemoryOffsetStore;
pub use pipeline_store::InMemoryPipelineStore;
pub use snapshot_store::InMemorySnapshotStore;
pub use state_store::InMemoryStateStore;

/// Errors raised by stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("store failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub(crate) fn not_found(kind: &str, name: &str, rev: &str) -> Self {
        Self::NotFound(format!("{} for pipeline '{}' rev '{}'", kind, name, rev))
    }
}

/// Key every store indexes pipelines by
pub(crate) fn key(name: &str, rev: &str) -> (String, String) {
    (name.to_string(), rev.to_string())
}
