//! Modules exposed to pipeline scripts

pub mod log;

pub use log::{LogLevel, LogModule, LogSink, TracingLogSink};
