//! Service layer
//!
//! Services hold the runner's shared state: admission slots, the lifecycle
//! state machine and its listeners, quarantined error records and raised
//! alerts. They are shared between the runner façade, the main loop and the
//! background workers, so every service is `Send + Sync`.

mod admission;
mod alerts;
mod error_records;
mod listener;
mod state_machine;

pub use admission::ResourceManager;
pub use alerts::AlertManager;
pub use error_records::{ErrorMessage, ErrorRecordStore};
pub use listener::{EventListenerManager, MetricsListener, StateListener};
pub use state_machine::LifecycleStateMachine;
