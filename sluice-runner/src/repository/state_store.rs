//! Pipeline state store

use sluice_core::domain::state::PipelineState;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::{StoreError, key};

/// Append-only store of pipeline states
///
/// The last saved state of a pipeline is its current state; all saved states
/// in order form its history.
pub trait StateStore: Send + Sync {
    /// Returns the current state of a pipeline
    fn get_state(&self, name: &str, rev: &str) -> Result<PipelineState, StoreError>;

    /// Appends a state, making it the current one
    fn save_state(&self, state: &PipelineState) -> Result<(), StoreError>;

    /// Returns every saved state, oldest first
    fn get_history(&self, name: &str, rev: &str) -> Result<Vec<PipelineState>, StoreError>;

    /// Drops the history, keeping only the current state
    fn delete_history(&self, name: &str, rev: &str) -> Result<(), StoreError>;
}

/// In-memory implementation of StateStore
#[derive(Default)]
pub struct InMemoryStateStore {
    states: Mutex<HashMap<(String, String), Vec<PipelineState>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for InMemoryStateStore {
    fn get_state(&self, name: &str, rev: &str) -> Result<PipelineState, StoreError> {
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states
            .get(&key(name, rev))
            .and_then(|history| history.last().cloned())
            .ok_or_else(|| StoreError::not_found("state", name, rev))
    }

    fn save_state(&self, state: &PipelineState) -> Result<(), StoreError> {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states
            .entry(key(&state.name, &state.rev))
            .or_default()
            .push(state.clone());
        Ok(())
    }

    fn get_history(&self, name: &str, rev: &str) -> Result<Vec<PipelineState>, StoreError> {
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(states.get(&key(name, rev)).cloned().unwrap_or_default())
    }

    fn delete_history(&self, name: &str, rev: &str) -> Result<(), StoreError> {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(history) = states.get_mut(&key(name, rev)) {
            let keep = history.len().saturating_sub(1);
            history.drain(..keep);
        }
        Ok(())
    }
}
