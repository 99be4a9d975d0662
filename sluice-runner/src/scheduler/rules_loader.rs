//! Rules config loader
//!
//! Polls the pipeline store for the pipeline's rules. When the rules' uuid
//! changes, the production observer is reconfigured and the new rules are
//! queued for the data rule observer.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

use super::Worker;
use crate::error::Result;
use crate::pipeline::observer::ProductionObserver;
use crate::repository::PipelineStore;

pub struct RulesConfigLoader {
    name: String,
    rev: String,
    store: Arc<dyn PipelineStore>,
    observer: Arc<ProductionObserver>,
    current_uuid: Mutex<Option<String>>,
}

impl RulesConfigLoader {
    pub fn new(
        name: impl Into<String>,
        rev: impl Into<String>,
        store: Arc<dyn PipelineStore>,
        observer: Arc<ProductionObserver>,
    ) -> Self {
        Self {
            name: name.into(),
            rev: rev.into(),
            store,
            observer,
            current_uuid: Mutex::new(None),
        }
    }

    /// Loads the rules, returning `true` if they changed since the last load
    pub async fn load(&self) -> Result<bool> {
        let rules = self.store.retrieve_rules(&self.name, &self.rev)?;

        {
            let mut current = self
                .current_uuid
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if current.as_deref() == Some(rules.uuid.as_str()) {
                return Ok(false);
            }
            *current = Some(rules.uuid.clone());
        }

        info!(
            "Loaded rules '{}' for pipeline '{}' ({} metric, {} data)",
            rules.uuid,
            self.name,
            rules.metric_rules.len(),
            rules.data_rules.len()
        );
        self.observer.reconfigure(rules.clone());
        self.observer.push_rules_change(rules).await;
        Ok(true)
    }
}

#[async_trait]
impl Worker for RulesConfigLoader {
    fn name(&self) -> &'static str {
        "rules-config-loader"
    }

    async fn run_once(&self) {
        if let Err(e) = self.load().await {
            warn!("Failed to reload rules of pipeline '{}': {}", self.name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryPipelineStore;
    use crate::scheduler::queue::{WorkQueueEntry, work_queue};
    use sluice_core::domain::rule::RuleDefinitions;

    fn rules(uuid: &str) -> RuleDefinitions {
        RuleDefinitions {
            uuid: uuid.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_only_changed_rules_are_pushed() {
        let store = Arc::new(InMemoryPipelineStore::new());
        store.save_rules("p", "0", rules("v1"));
        let (sender, mut receiver) = work_queue(10);
        let observer = Arc::new(ProductionObserver::new(sender));
        let loader = RulesConfigLoader::new("p", "0", store.clone(), observer.clone());

        assert!(loader.load().await.unwrap());
        assert!(!loader.load().await.unwrap());

        store.save_rules("p", "0", rules("v2"));
        assert!(loader.load().await.unwrap());
        assert_eq!(observer.rules().uuid, "v2");

        let mut pushed = Vec::new();
        while let Ok(WorkQueueEntry::RulesChange(r)) = receiver.try_recv() {
            pushed.push(r.uuid);
        }
        assert_eq!(pushed, vec!["v1", "v2"]);
    }
}
