//! Sluice Lua Infrastructure
//!
//! Scripted record processing for Sluice pipelines. This crate provides:
//! - Module trait and registry for Lua modules exposed to scripts
//! - A restricted execution sandbox
//! - Core module implementations (logging)
//! - The Lua script processor stage

pub mod module;
pub mod modules;
pub mod processor;
pub mod sandbox;

pub use module::{ModuleRegistry, ScriptModule};
pub use modules::{LogLevel, LogModule, LogSink, TracingLogSink};
pub use processor::{ProcessingMode, ScriptProcessor};
pub use sandbox::create_sandbox;
