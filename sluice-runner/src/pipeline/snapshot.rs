//! Snapshot capture
//!
//! At most one capture is in progress per run. The main loop offers every
//! batch's stage outputs while a capture is active; once the requested number
//! of batches is buffered the capture completes and hands the data back for
//! saving.

use sluice_core::domain::record::Record;
use sluice_core::domain::snapshot::StageOutput;
use std::sync::{Mutex, PoisonError};

struct ActiveCapture {
    id: String,
    batches: usize,
    batch_size: usize,
    captured: Vec<Vec<StageOutput>>,
}

/// A capture that buffered all of its batches
#[derive(Debug)]
pub struct CompletedCapture {
    pub id: String,
    pub batches: Vec<Vec<StageOutput>>,
}

#[derive(Default)]
pub struct SnapshotCapture {
    active: Mutex<Option<ActiveCapture>>,
}

impl SnapshotCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts capturing into snapshot `id`
    ///
    /// Returns `false` if another capture is already in progress.
    pub fn request(&self, id: &str, batches: usize, batch_size: usize) -> bool {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.is_some() {
            return false;
        }
        *active = Some(ActiveCapture {
            id: id.to_string(),
            batches,
            batch_size,
            captured: Vec::with_capacity(batches),
        });
        true
    }

    /// Abandons capture `id`; returns `true` if it was in progress
    pub fn cancel(&self, id: &str) -> bool {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.as_ref().is_some_and(|c| c.id == id) {
            *active = None;
            return true;
        }
        false
    }

    /// Drops whatever capture is in progress, returning its id
    pub fn abandon(&self) -> Option<String> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(|c| c.id)
    }

    pub fn is_active(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Maximum records kept per stage, if a capture is active
    pub fn batch_size(&self) -> Option<usize> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|c| c.batch_size)
    }

    /// Buffers one batch's outputs, keeping at most `batch_size` records per stage
    pub fn record_batch(&self, outputs: Vec<(String, Vec<Record>)>) -> Option<CompletedCapture> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let capture = active.as_mut()?;

        let batch = outputs
            .into_iter()
            .map(|(stage, mut records)| {
                records.truncate(capture.batch_size);
                StageOutput { stage, records }
            })
            .collect();
        capture.captured.push(batch);

        if capture.captured.len() < capture.batches {
            return None;
        }
        active.take().map(|c| CompletedCapture {
            id: c.id,
            batches: c.captured,
        })
    }
}
