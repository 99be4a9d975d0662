//! Alert domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A triggered rule alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertInfo {
    pub pipeline_name: String,
    pub rule_id: String,
    /// Observed value that tripped the rule
    pub current_value: f64,
    pub threshold: f64,
    pub triggered_at: DateTime<Utc>,
}
