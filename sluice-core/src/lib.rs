//! Sluice Core
//!
//! Core types and abstractions for the Sluice pipeline engine.
//!
//! This crate contains:
//! - Domain types: pipeline status and state, records and batches, rules, snapshots
//! - Stage traits: the contracts sources, processors and targets implement
//! - Transport trait: the capability destination stages deliver through
//! - DTOs: Data transfer objects exchanged with external services

pub mod domain;
pub mod dto;
pub mod stage;
pub mod transport;
