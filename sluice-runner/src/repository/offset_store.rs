//! Source offset store

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use super::{StoreError, key};

/// Committed source offsets, one per pipeline
pub trait OffsetStore: Send + Sync {
    fn get_offset(&self, name: &str, rev: &str) -> Result<Option<String>, StoreError>;

    fn commit_offset(&self, name: &str, rev: &str, offset: &str) -> Result<(), StoreError>;

    /// Forgets the committed offset so the next run starts from the beginning
    fn reset_offset(&self, name: &str, rev: &str) -> Result<(), StoreError>;
}

/// In-memory implementation of OffsetStore
#[derive(Default)]
pub struct InMemoryOffsetStore {
    offsets: Mutex<HashMap<(String, String), String>>,
}

impl InMemoryOffsetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OffsetStore for InMemoryOffsetStore {
    fn get_offset(&self, name: &str, rev: &str) -> Result<Option<String>, StoreError> {
        let offsets = self.offsets.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(offsets.get(&key(name, rev)).cloned())
    }

    fn commit_offset(&self, name: &str, rev: &str, offset: &str) -> Result<(), StoreError> {
        let mut offsets = self.offsets.lock().unwrap_or_else(PoisonError::into_inner);
        offsets.insert(key(name, rev), offset.to_string());
        Ok(())
    }

    fn reset_offset(&self, name: &str, rev: &str) -> Result<(), StoreError> {
        let mut offsets = self.offsets.lock().unwrap_or_else(PoisonError::into_inner);
        offsets.remove(&key(name, rev));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_and_reset() {
        let store = InMemoryOffsetStore::new();
        assert_eq!(store.get_offset("p", "0").unwrap(), None);

        store.commit_offset("p", "0", "42").unwrap();
        assert_eq!(store.get_offset("p", "0").unwrap().as_deref(), Some("42"));
        assert_eq!(store.get_offset("p", "1").unwrap(), None);

        store.reset_offset("p", "0").unwrap();
        assert_eq!(store.get_offset("p", "0").unwrap(), None);
    }
}
