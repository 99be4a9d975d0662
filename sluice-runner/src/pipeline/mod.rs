//! Pipeline execution
//!
//! - [`builder`]: turns a pipeline definition into an executable graph
//! - [`production`]: the main loop of a run
//! - [`observer`]: samples stage output for data rules
//! - [`snapshot`]: in-flight snapshot capture

pub mod builder;
pub mod graph;
pub mod observer;
pub mod production;
pub mod snapshot;

pub use builder::{ConfigGraphBuilder, StageGraphBuilder};
pub use graph::{ExecutableGraph, NamedStage};
pub use observer::ProductionObserver;
pub use production::{MemoryLimit, ProductionPipeline, RunOutcome, RunServices};
pub use snapshot::SnapshotCapture;
