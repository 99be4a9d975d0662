//! Core domain types
//!
//! This module contains the core domain structures used across Sluice crates.
//! These types are shared between the runner (which executes pipelines) and the
//! stage implementations (which only ever see records and batches).

pub mod alert;
pub mod pipeline;
pub mod record;
pub mod rule;
pub mod snapshot;
pub mod state;
pub mod status;
