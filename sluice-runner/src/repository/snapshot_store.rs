//! Snapshot store

use chrono::Utc;
use sluice_core::domain::snapshot::{Snapshot, SnapshotInfo, StageOutput};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::{StoreError, key};

/// Storage for captured snapshots
///
/// A snapshot is created empty and in progress when capture is requested,
/// then saved with its data once the runner has captured enough batches.
pub trait SnapshotStore: Send + Sync {
    /// Registers a new in-progress snapshot
    fn create(
        &self,
        user: &str,
        name: &str,
        rev: &str,
        id: &str,
        label: &str,
    ) -> Result<SnapshotInfo, StoreError>;

    /// Stores captured data and marks the snapshot complete
    fn save(
        &self,
        name: &str,
        rev: &str,
        id: &str,
        batches: Vec<Vec<StageOutput>>,
    ) -> Result<SnapshotInfo, StoreError>;

    fn get(&self, name: &str, rev: &str, id: &str) -> Result<Option<Snapshot>, StoreError>;

    /// Lists the snapshots of a pipeline, oldest first
    fn get_summary_for_pipeline(&self, name: &str, rev: &str)
    -> Result<Vec<SnapshotInfo>, StoreError>;

    fn delete_snapshot(&self, name: &str, rev: &str, id: &str) -> Result<(), StoreError>;
}

/// In-memory implementation of SnapshotStore
#[derive(Default)]
pub struct InMemorySnapshotStore {
    snapshots: Mutex<HashMap<(String, String), Vec<Snapshot>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn create(
        &self,
        user: &str,
        name: &str,
        rev: &str,
        id: &str,
        label: &str,
    ) -> Result<SnapshotInfo, StoreError> {
        let info = SnapshotInfo {
            id: id.to_string(),
            name: label.to_string(),
            user: user.to_string(),
            pipeline_name: name.to_string(),
            rev: rev.to_string(),
            timestamp: Utc::now(),
            in_progress: true,
        };

        let mut snapshots = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        let pipeline = snapshots.entry(key(name, rev)).or_default();
        if pipeline.iter().any(|s| s.info.id == id) {
            return Err(StoreError::Backend(format!("snapshot '{}' already exists", id)));
        }
        pipeline.push(Snapshot {
            info: info.clone(),
            batches: Vec::new(),
        });
        Ok(info)
    }

    fn save(
        &self,
        name: &str,
        rev: &str,
        id: &str,
        batches: Vec<Vec<StageOutput>>,
    ) -> Result<SnapshotInfo, StoreError> {
        let mut snapshots = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = snapshots
            .get_mut(&key(name, rev))
            .and_then(|pipeline| pipeline.iter_mut().find(|s| s.info.id == id))
            .ok_or_else(|| StoreError::NotFound(format!("snapshot '{}'", id)))?;

        snapshot.batches = batches;
        snapshot.info.in_progress = false;
        snapshot.info.timestamp = Utc::now();
        Ok(snapshot.info.clone())
    }

    fn get(&self, name: &str, rev: &str, id: &str) -> Result<Option<Snapshot>, StoreError> {
        let snapshots = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(snapshots
            .get(&key(name, rev))
            .and_then(|pipeline| pipeline.iter().find(|s| s.info.id == id).cloned()))
    }

    fn get_summary_for_pipeline(
        &self,
        name: &str,
        rev: &str,
    ) -> Result<Vec<SnapshotInfo>, StoreError> {
        let snapshots = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(snapshots
            .get(&key(name, rev))
            .map(|pipeline| pipeline.iter().map(|s| s.info.clone()).collect())
            .unwrap_or_default())
    }

    fn delete_snapshot(&self, name: &str, rev: &str, id: &str) -> Result<(), StoreError> {
        let mut snapshots = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pipeline) = snapshots.get_mut(&key(name, rev)) {
            pipeline.retain(|s| s.info.id != id);
        }
        Ok(())
    }
}
