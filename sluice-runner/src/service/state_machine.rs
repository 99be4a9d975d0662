//! Lifecycle state machine
//!
//! Every status change of a pipeline goes through
//! [`LifecycleStateMachine::request_transition`]. The transition is validated
//! against the static table and persisted while holding the per-pipeline
//! lock; listeners are notified only after the lock has been released, so a
//! listener may call back into the runner without deadlocking.

use chrono::Utc;
use serde_json::Value as JsonValue;
use sluice_core::domain::state::{ExecutionMode, PipelineState};
use sluice_core::domain::status::PipelineStatus;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::error::{Result, RunnerError};
use crate::metrics::PipelineMetrics;
use crate::repository::StateStore;
use crate::service::listener::EventListenerManager;

/// Serialized transitions for one pipeline revision
pub struct LifecycleStateMachine {
    name: String,
    rev: String,
    store: Arc<dyn StateStore>,
    listeners: Arc<EventListenerManager>,
    transition_lock: Mutex<()>,
    metrics: Mutex<Option<Arc<PipelineMetrics>>>,
}

impl LifecycleStateMachine {
    pub fn new(
        name: impl Into<String>,
        rev: impl Into<String>,
        store: Arc<dyn StateStore>,
        listeners: Arc<EventListenerManager>,
    ) -> Self {
        Self {
            name: name.into(),
            rev: rev.into(),
            store,
            listeners,
            transition_lock: Mutex::new(()),
            metrics: Mutex::new(None),
        }
    }

    /// Current persisted state
    pub fn current(&self) -> Result<PipelineState> {
        Ok(self.store.get_state(&self.name, &self.rev)?)
    }

    pub fn status(&self) -> Result<PipelineStatus> {
        Ok(self.current()?.status)
    }

    /// Attaches the live metrics of the current run, or detaches them
    pub fn set_metrics(&self, metrics: Option<Arc<PipelineMetrics>>) {
        *self.metrics.lock().unwrap_or_else(PoisonError::into_inner) = metrics;
    }

    fn serialized_metrics(&self) -> Option<String> {
        let metrics = self
            .metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()?;
        match metrics.to_json() {
            Ok(json) => Some(json),
            Err(e) => {
                warn!("Failed to serialize metrics of '{}': {}", self.name, e);
                None
            }
        }
    }

    /// Moves the pipeline to `to`, persisting and broadcasting the new state
    ///
    /// # Arguments
    /// * `user` - User recorded on the new state
    /// * `to` - Target status
    /// * `message` - Optional human readable detail (e.g. a failure cause)
    /// * `attributes` - Attributes of the new state; `None` keeps the current ones
    ///
    /// # Errors
    /// `IllegalTransition` if `to` is not a successor of the current status; in
    /// that case nothing is persisted and no listener is called.
    pub fn request_transition(
        &self,
        user: &str,
        to: PipelineStatus,
        message: Option<String>,
        attributes: Option<HashMap<String, JsonValue>>,
    ) -> Result<PipelineState> {
        let (from, next) = {
            let _guard = self
                .transition_lock
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            let current = self.current()?;
            if !current.status.can_transition_to(to) {
                return Err(RunnerError::IllegalTransition {
                    from: current.status,
                    to,
                });
            }

            let metrics = if !to.is_active() || to == PipelineStatus::Disconnected {
                self.serialized_metrics().or_else(|| current.metrics.clone())
            } else {
                None
            };

            let next = PipelineState {
                user: user.to_string(),
                name: self.name.clone(),
                rev: self.rev.clone(),
                status: to,
                message,
                attributes: attributes.unwrap_or_else(|| current.attributes.clone()),
                execution_mode: ExecutionMode::Standalone,
                metrics,
                timestamp: Utc::now(),
            };
            self.store.save_state(&next)?;
            (current, next)
        };

        info!(
            "Pipeline '{}' rev '{}': {} -> {}",
            self.name, self.rev, from.status, next.status
        );
        self.listeners.broadcast_state_change(&from, &next);
        debug!("Broadcast {} -> {} for '{}'", from.status, next.status, self.name);

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryStateStore;
    use crate::service::listener::StateListener;

    fn machine_in(status: PipelineStatus) -> (LifecycleStateMachine, Arc<InMemoryStateStore>) {
        let store = Arc::new(InMemoryStateStore::new());
        let mut state = PipelineState::edited("admin", "p", "0");
        state.status = status;
        store.save_state(&state).unwrap();

        let machine = LifecycleStateMachine::new(
            "p",
            "0",
            store.clone(),
            Arc::new(EventListenerManager::new()),
        );
        (machine, store)
    }

    #[test]
    fn test_illegal_transitions_leave_state_unchanged() {
        for from in PipelineStatus::ALL {
            for to in PipelineStatus::ALL {
                if from.can_transition_to(to) {
                    continue;
                }
                let (machine, store) = machine_in(from);

                let err = machine
                    .request_transition("admin", to, None, None)
                    .unwrap_err();

                assert!(
                    matches!(err, RunnerError::IllegalTransition { from: f, to: t } if f == from && t == to)
                );
                assert_eq!(store.get_state("p", "0").unwrap().status, from);
                assert_eq!(store.get_history("p", "0").unwrap().len(), 1);
            }
        }
    }

    #[test]
    fn test_legal_transitions_append_one_state() {
        for from in PipelineStatus::ALL {
            for &to in from.successors() {
                let (machine, store) = machine_in(from);

                let state = machine.request_transition("admin", to, None, None).unwrap();

                assert_eq!(state.status, to);
                let history = store.get_history("p", "0").unwrap();
                assert_eq!(history.len(), 2);
                assert_eq!(history[1].status, to);
            }
        }
    }

    #[test]
    fn test_inactive_target_captures_metrics() {
        let (machine, _) = machine_in(PipelineStatus::Running);
        let metrics = Arc::new(PipelineMetrics::new());
        metrics.record_batch(3, 3, 0, std::time::Duration::from_millis(1));
        machine.set_metrics(Some(metrics));

        let state = machine
            .request_transition("admin", PipelineStatus::Stopping, None, None)
            .unwrap();
        assert!(state.metrics.is_none());

        let state = machine
            .request_transition("admin", PipelineStatus::Stopped, None, None)
            .unwrap();
        let json: JsonValue = serde_json::from_str(state.metrics.as_deref().unwrap()).unwrap();
        assert_eq!(json["input_records"], 3);
    }

    #[test]
    fn test_metrics_fall_back_to_previous_state() {
        let store = Arc::new(InMemoryStateStore::new());
        let mut state = PipelineState::edited("admin", "p", "0");
        state.status = PipelineStatus::Stopping;
        state.metrics = Some("{\"batch_count\":9}".to_string());
        store.save_state(&state).unwrap();
        let machine =
            LifecycleStateMachine::new("p", "0", store, Arc::new(EventListenerManager::new()));

        let state = machine
            .request_transition("admin", PipelineStatus::Stopped, None, None)
            .unwrap();
        assert_eq!(state.metrics.as_deref(), Some("{\"batch_count\":9}"));
    }

    struct ReentrantListener {
        machine: Mutex<Option<Arc<LifecycleStateMachine>>>,
    }

    impl StateListener for ReentrantListener {
        fn on_state_change(&self, _: &PipelineState, to: &PipelineState) -> anyhow::Result<()> {
            let machine = self.machine.lock().unwrap().clone();
            if let (Some(machine), PipelineStatus::Starting) = (machine, to.status) {
                machine.request_transition("listener", PipelineStatus::Running, None, None)?;
            }
            Ok(())
        }
    }

    #[test]
    fn test_listener_may_transition_during_broadcast() {
        let store = Arc::new(InMemoryStateStore::new());
        store
            .save_state(&PipelineState::edited("admin", "p", "0"))
            .unwrap();
        let listeners = Arc::new(EventListenerManager::new());
        let listener = Arc::new(ReentrantListener {
            machine: Mutex::new(None),
        });
        listeners.add_state_listener(listener.clone());

        let machine = Arc::new(LifecycleStateMachine::new("p", "0", store.clone(), listeners));
        *listener.machine.lock().unwrap() = Some(machine.clone());

        machine
            .request_transition("admin", PipelineStatus::Starting, None, None)
            .unwrap();

        let statuses: Vec<_> = store
            .get_history("p", "0")
            .unwrap()
            .into_iter()
            .map(|s| s.status)
            .collect();
        assert_eq!(
            statuses,
            vec![PipelineStatus::Edited, PipelineStatus::Starting, PipelineStatus::Running]
        );
    }
}
