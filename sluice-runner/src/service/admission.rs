//! Resource admission gate
//!
//! Bounds the number of concurrent runs per execution mode. Acquisition never
//! blocks: a caller that gets `false` must fail its start request.

use sluice_core::domain::state::ExecutionMode;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

struct Slots {
    max: usize,
    used: AtomicUsize,
}

impl Slots {
    fn new(max: usize) -> Self {
        Self {
            max,
            used: AtomicUsize::new(0),
        }
    }
}

/// Admission counters shared by every runner of the process
pub struct ResourceManager {
    standalone: Slots,
    cluster: Slots,
}

impl ResourceManager {
    /// Creates a gate allowing at most `max_standalone` standalone runs and
    /// `max_cluster` cluster runs at once
    pub fn new(max_standalone: usize, max_cluster: usize) -> Self {
        Self {
            standalone: Slots::new(max_standalone),
            cluster: Slots::new(max_cluster),
        }
    }

    fn slots(&self, mode: ExecutionMode) -> &Slots {
        match mode {
            ExecutionMode::Standalone => &self.standalone,
            ExecutionMode::Cluster => &self.cluster,
        }
    }

    /// Claims one slot, returning `false` when all slots are taken
    pub fn acquire(&self, mode: ExecutionMode) -> bool {
        let slots = self.slots(mode);
        let acquired = slots
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < slots.max).then_some(used + 1)
            })
            .is_ok();
        debug!(
            "{} slot request: granted={}, in use={}/{}",
            mode,
            acquired,
            slots.used.load(Ordering::Acquire),
            slots.max
        );
        acquired
    }

    /// Returns one slot; a no-op when none is in use
    pub fn release(&self, mode: ExecutionMode) {
        let _ = self
            .slots(mode)
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_sub(1)
            });
    }

    /// Slots currently held for `mode`
    pub fn in_use(&self, mode: ExecutionMode) -> usize {
        self.slots(mode).used.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_excess_requests_are_refused() {
        let gate = ResourceManager::new(2, 1);

        assert!(gate.acquire(ExecutionMode::Standalone));
        assert!(gate.acquire(ExecutionMode::Standalone));
        assert!(!gate.acquire(ExecutionMode::Standalone));
        assert!(!gate.acquire(ExecutionMode::Standalone));

        gate.release(ExecutionMode::Standalone);
        assert_eq!(gate.in_use(ExecutionMode::Standalone), 1);
        assert!(gate.acquire(ExecutionMode::Standalone));
        assert!(!gate.acquire(ExecutionMode::Standalone));
    }

    #[test]
    fn test_modes_are_counted_separately() {
        let gate = ResourceManager::new(1, 1);
        assert!(gate.acquire(ExecutionMode::Standalone));
        assert!(gate.acquire(ExecutionMode::Cluster));
        assert!(!gate.acquire(ExecutionMode::Cluster));
    }

    #[test]
    fn test_release_never_underflows() {
        let gate = ResourceManager::new(1, 1);
        gate.release(ExecutionMode::Standalone);
        assert_eq!(gate.in_use(ExecutionMode::Standalone), 0);
        assert!(gate.acquire(ExecutionMode::Standalone));
        assert!(!gate.acquire(ExecutionMode::Standalone));
    }

    #[test]
    fn test_concurrent_acquire_never_exceeds_max() {
        let gate = Arc::new(ResourceManager::new(5, 0));
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let gate = gate.clone();
                std::thread::spawn(move || gate.acquire(ExecutionMode::Standalone))
            })
            .collect();

        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|granted| *granted)
            .count();
        assert_eq!(granted, 5);
        assert_eq!(gate.in_use(ExecutionMode::Standalone), 5);
    }
}
