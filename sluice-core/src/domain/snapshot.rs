//! Snapshot domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::record::Record;

/// Summary of a captured (or in-progress) snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub id: String,
    pub name: String,
    pub user: String,
    pub pipeline_name: String,
    pub rev: String,
    pub timestamp: DateTime<Utc>,
    pub in_progress: bool,
}

/// Output of one stage for one captured batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutput {
    pub stage: String,
    pub records: Vec<Record>,
}

/// A captured copy of in-flight batches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub info: SnapshotInfo,
    /// One entry per captured batch, each holding every stage's output
    pub batches: Vec<Vec<StageOutput>>,
}
