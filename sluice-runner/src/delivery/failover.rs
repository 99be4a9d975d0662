//! Endpoint failover pool
//!
//! Destination endpoints are shuffled once and split into an active subset
//! and a standby list. Calls rotate round-robin over the active subset; when
//! the previous call failed, the endpoint that failed is swapped for the head
//! of the standby list and moves to the standby tail.

use rand::seq::SliceRandom;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct EndpointPool {
    active: Vec<String>,
    standby: VecDeque<String>,
    last_active: usize,
}

impl EndpointPool {
    /// Shuffles `endpoints` and partitions them
    ///
    /// Returns `None` for an empty endpoint list.
    pub fn new(mut endpoints: Vec<String>) -> Option<Self> {
        if endpoints.is_empty() {
            return None;
        }
        endpoints.shuffle(&mut rand::thread_rng());

        let active_size = Self::active_size(endpoints.len());
        let standby = endpoints.split_off(active_size);
        Some(Self {
            active: endpoints,
            standby: standby.into(),
            // The first call lands on index 0
            last_active: active_size - 1,
        })
    }

    /// Size of the active subset for `total` endpoints:
    /// `max(2, floor(ln total) + 1)`, bounded by `total`
    pub fn active_size(total: usize) -> usize {
        if total <= 1 {
            return total;
        }
        let by_log = (total as f64).ln().floor() as usize + 1;
        by_log.max(2).min(total)
    }

    /// Endpoint for the next submission
    ///
    /// With `previous_failed`, the endpoint used last is replaced by the next
    /// standby endpoint (when there is one) and that replacement is returned.
    /// Otherwise the active subset is walked round-robin. A single endpoint
    /// is always returned as is.
    pub fn next(&mut self, previous_failed: bool) -> &str {
        if self.total() == 1 {
            return &self.active[0];
        }

        if previous_failed {
            if let Some(replacement) = self.standby.pop_front() {
                let failed = std::mem::replace(&mut self.active[self.last_active], replacement);
                self.standby.push_back(failed);
                return &self.active[self.last_active];
            }
        }

        self.last_active = (self.last_active + 1) % self.active.len();
        &self.active[self.last_active]
    }

    pub fn active(&self) -> &[String] {
        &self.active
    }

    pub fn standby(&self) -> impl Iterator<Item = &String> {
        self.standby.iter()
    }

    pub fn total(&self) -> usize {
        self.active.len() + self.standby.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn endpoints(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("host-{}:9000", i)).collect()
    }

    #[test]
    fn test_active_size() {
        assert_eq!(EndpointPool::active_size(1), 1);
        assert_eq!(EndpointPool::active_size(2), 2);
        assert_eq!(EndpointPool::active_size(3), 2);
        assert_eq!(EndpointPool::active_size(8), 3);
        assert_eq!(EndpointPool::active_size(20), 3);
        assert_eq!(EndpointPool::active_size(21), 4);
        assert_eq!(EndpointPool::active_size(100), 5);
    }

    #[test]
    fn test_partition_covers_every_endpoint_once() {
        for n in 2..40 {
            let pool = EndpointPool::new(endpoints(n)).unwrap();
            assert_eq!(pool.active().len(), EndpointPool::active_size(n));

            let all: Vec<&String> = pool.active().iter().chain(pool.standby()).collect();
            let unique: HashSet<&String> = all.iter().copied().collect();
            assert_eq!(all.len(), n);
            assert_eq!(unique.len(), n);
        }
    }

    #[test]
    fn test_failover_swaps_with_standby_head() {
        let mut pool = EndpointPool::new(endpoints(10)).unwrap();
        let used = pool.next(false).to_string();
        let standby_head = pool.standby().next().unwrap().clone();

        let replacement = pool.next(true).to_string();

        assert_eq!(replacement, standby_head);
        assert!(pool.active().contains(&replacement));
        assert!(!pool.active().contains(&used));
        assert_eq!(pool.standby().last(), Some(&used));
        assert_eq!(pool.total(), 10);
    }

    #[test]
    fn test_retry_without_standby_moves_to_other_endpoint() {
        let mut pool = EndpointPool::new(endpoints(2)).unwrap();
        let first = pool.next(false).to_string();
        let second = pool.next(true).to_string();
        assert_ne!(first, second);
    }

    #[test]
    fn test_round_robin_over_active() {
        let mut pool = EndpointPool::new(endpoints(8)).unwrap();
        let active = pool.active().to_vec();
        let calls: Vec<String> = (0..6).map(|_| pool.next(false).to_string()).collect();
        let expected: Vec<String> = active.iter().cycle().take(6).cloned().collect();
        assert_eq!(calls, expected);
    }

    #[test]
    fn test_single_endpoint_is_reused() {
        let mut pool = EndpointPool::new(endpoints(1)).unwrap();
        assert_eq!(pool.next(false), "host-0:9000");
        assert_eq!(pool.next(true), "host-0:9000");
        assert!(EndpointPool::new(vec![]).is_none());
    }
}
