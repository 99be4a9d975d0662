//! Update check DTOs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Payload sent to the update service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCheckRequest {
    /// Anonymous identifier of this runner process
    pub runner_id: String,
    pub version: String,
    /// Stage types used by the pipeline being run
    pub stage_types: Vec<String>,
}

/// Response from the update service
///
/// Treated as opaque key/value data and served back as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateInfo {
    #[serde(flatten)]
    pub entries: HashMap<String, serde_json::Value>,
}
