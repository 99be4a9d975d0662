//! Pipeline definition and rules store

use sluice_core::domain::pipeline::PipelineConfiguration;
use sluice_core::domain::rule::RuleDefinitions;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::{StoreError, key};

/// Source of pipeline definitions and their rules
pub trait PipelineStore: Send + Sync {
    /// Loads the definition of a pipeline revision
    fn load(&self, name: &str, rev: &str) -> Result<PipelineConfiguration, StoreError>;

    /// Loads the rules attached to a pipeline revision
    ///
    /// A pipeline without saved rules has empty rules.
    fn retrieve_rules(&self, name: &str, rev: &str) -> Result<RuleDefinitions, StoreError>;
}

/// In-memory implementation of PipelineStore
#[derive(Default)]
pub struct InMemoryPipelineStore {
    pipelines: Mutex<HashMap<(String, String), PipelineConfiguration>>,
    rules: Mutex<HashMap<(String, String), RuleDefinitions>>,
}

impl InMemoryPipelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_pipeline(&self, config: PipelineConfiguration) {
        let mut pipelines = self.pipelines.lock().unwrap_or_else(PoisonError::into_inner);
        pipelines.insert(key(&config.name, &config.rev), config);
    }

    pub fn save_rules(&self, name: &str, rev: &str, rules: RuleDefinitions) {
        let mut all = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        all.insert(key(name, rev), rules);
    }
}

impl PipelineStore for InMemoryPipelineStore {
    fn load(&self, name: &str, rev: &str) -> Result<PipelineConfiguration, StoreError> {
        let pipelines = self.pipelines.lock().unwrap_or_else(PoisonError::into_inner);
        pipelines
            .get(&key(name, rev))
            .cloned()
            .ok_or_else(|| StoreError::not_found("definition", name, rev))
    }

    fn retrieve_rules(&self, name: &str, rev: &str) -> Result<RuleDefinitions, StoreError> {
        let rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(rules.get(&key(name, rev)).cloned().unwrap_or_default())
    }
}
