//! Sluice Runner
//!
//! Executes one pipeline revision at a time per [`standalone::StandaloneRunner`]:
//! - Lifecycle: every status change goes through the lifecycle state machine
//! - Admission: a bounded number of concurrent runs per execution mode
//! - Main loop: source, processors and targets run batch by batch
//! - Workers: rules loading, metric and data rule observation, metrics
//!   emission and update checks run next to the main loop
//! - Delivery: destination stages share one delivery contract with endpoint
//!   failover

pub mod config;
pub mod context;
pub mod delivery;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod repository;
pub mod scheduler;
pub mod service;
pub mod stages;
pub mod standalone;

pub use config::RunnerConfig;
pub use error::{Result, RunnerError};
pub use standalone::{RunnerServices, StandaloneRunner};
