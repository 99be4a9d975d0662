//! Pipeline state domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::status::PipelineStatus;

/// How a pipeline run is hosted
///
/// Also used as the admission kind when acquiring a run slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    Standalone,
    Cluster,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Standalone => write!(f, "STANDALONE"),
            ExecutionMode::Cluster => write!(f, "CLUSTER"),
        }
    }
}

/// Immutable record of one pipeline status transition
///
/// A new state is appended for every legal transition; the ordered sequence
/// for a (name, rev) pair is the pipeline's audit history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub user: String,
    pub name: String,
    pub rev: String,
    pub status: PipelineStatus,
    pub message: Option<String>,
    pub attributes: HashMap<String, serde_json::Value>,
    pub execution_mode: ExecutionMode,
    /// Serialized metrics captured when the run left an active status
    pub metrics: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl PipelineState {
    /// Initial state of a freshly edited pipeline
    pub fn edited(user: impl Into<String>, name: impl Into<String>, rev: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            name: name.into(),
            rev: rev.into(),
            status: PipelineStatus::Edited,
            message: None,
            attributes: HashMap::new(),
            execution_mode: ExecutionMode::Standalone,
            metrics: None,
            timestamp: Utc::now(),
        }
    }
}
