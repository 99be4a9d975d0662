//! Data Transfer Objects
//!
//! DTOs exchanged between the runner and external services. They are
//! lightweight and serialized as JSON over the wire.

pub mod update;
