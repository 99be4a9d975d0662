//! Raised rule alerts

use chrono::Utc;
use sluice_core::domain::alert::AlertInfo;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use tracing::warn;

/// Alert gauges of a pipeline, keyed by rule id
#[derive(Default)]
pub struct AlertManager {
    alerts: Mutex<BTreeMap<String, AlertInfo>>,
}

impl AlertManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the alert for `rule_id`
    ///
    /// Returns `false` if it was already raised; the existing alert keeps its
    /// trigger time and only its current value is refreshed.
    pub fn raise(&self, pipeline: &str, rule_id: &str, current_value: f64, threshold: f64) -> bool {
        let mut alerts = self.alerts.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = alerts.get_mut(rule_id) {
            existing.current_value = current_value;
            return false;
        }

        warn!(
            "Alert raised for pipeline '{}': rule '{}' value {} (threshold {})",
            pipeline, rule_id, current_value, threshold
        );
        alerts.insert(
            rule_id.to_string(),
            AlertInfo {
                pipeline_name: pipeline.to_string(),
                rule_id: rule_id.to_string(),
                current_value,
                threshold,
                triggered_at: Utc::now(),
            },
        );
        true
    }

    /// Clears the alert for `rule_id`, returning whether one was raised
    pub fn clear(&self, rule_id: &str) -> bool {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(rule_id)
            .is_some()
    }

    pub fn clear_all(&self) {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn list(&self) -> Vec<AlertInfo> {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raise_is_idempotent() {
        let alerts = AlertManager::new();
        assert!(alerts.raise("p", "r1", 5.0, 3.0));
        assert!(!alerts.raise("p", "r1", 7.0, 3.0));

        let listed = alerts.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].current_value, 7.0);
    }

    #[test]
    fn test_clear() {
        let alerts = AlertManager::new();
        alerts.raise("p", "r1", 5.0, 3.0);
        assert!(alerts.clear("r1"));
        assert!(!alerts.clear("r1"));
        assert!(alerts.list().is_empty());
    }
}
