//! Logging module for pipeline scripts
//!
//! Scripts call `log.debug`, `log.info`, `log.warning` and `log.error`. Where
//! the messages end up is decided by the [`LogSink`] the module is built with:
//! the script processor forwards them to `tracing`, tests collect them.

use crate::module::ScriptModule;
use mlua::prelude::*;
use std::sync::{Arc, Mutex};

/// Severity of a script log message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    const ALL: [(LogLevel, &'static str); 4] = [
        (LogLevel::Debug, "debug"),
        (LogLevel::Info, "info"),
        (LogLevel::Warning, "warning"),
        (LogLevel::Error, "error"),
    ];
}

/// Destination of script log messages
///
/// The sandbox runs with the `send` feature, so sinks cross threads with it.
pub trait LogSink: Send + Sync {
    fn write(&mut self, level: LogLevel, message: &str);
}

/// Sink forwarding script messages to `tracing`, tagged with the stage name
pub struct TracingLogSink {
    stage: String,
}

impl TracingLogSink {
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
        }
    }
}

impl LogSink for TracingLogSink {
    fn write(&mut self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!("[{}] {}", self.stage, message),
            LogLevel::Info => tracing::info!("[{}] {}", self.stage, message),
            LogLevel::Warning => tracing::warn!("[{}] {}", self.stage, message),
            LogLevel::Error => tracing::error!("[{}] {}", self.stage, message),
        }
    }
}

/// Exposes the `log` table to scripts, writing into `S`
pub struct LogModule<S: LogSink> {
    sink: Arc<Mutex<S>>,
}

impl<S: LogSink> LogModule<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
        }
    }
}

impl<S: LogSink + 'static> ScriptModule for LogModule<S> {
    fn id(&self) -> &'static str {
        "log"
    }

    fn register(&self, lua: &Lua) -> LuaResult<()> {
        let functions = lua.create_table()?;

        for (level, name) in LogLevel::ALL {
            let sink = self.sink.clone();
            functions.set(
                name,
                lua.create_function(move |_, message: String| {
                    sink.lock()
                        .map_err(|e| LuaError::RuntimeError(format!("log sink unavailable: {}", e)))?
                        .write(level, &message);
                    Ok(())
                })?,
            )?;
        }

        lua.globals().set(self.id(), functions)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CollectingSink {
        messages: Arc<Mutex<Vec<(LogLevel, String)>>>,
    }

    fn collecting() -> (CollectingSink, Arc<Mutex<Vec<(LogLevel, String)>>>) {
        let messages = Arc::new(Mutex::new(Vec::new()));
        (
            CollectingSink {
                messages: messages.clone(),
            },
            messages,
        )
    }

    impl LogSink for CollectingSink {
        fn write(&mut self, level: LogLevel, message: &str) {
            self.messages
                .lock()
                .unwrap()
                .push((level, message.to_string()));
        }
    }

    #[test]
    fn test_log_module_registration() {
        let (sink, _messages) = collecting();
        let lua = Lua::new();
        let module = LogModule::new(sink);

        assert_eq!(module.id(), "log");
        assert!(module.register(&lua).is_ok());

        let result: bool = lua
            .load("return type(log.debug) == 'function' and type(log.error) == 'function'")
            .eval()
            .unwrap();
        assert!(result);
    }

    #[test]
    fn test_log_all_levels() {
        let (sink, messages) = collecting();
        let lua = Lua::new();
        LogModule::new(sink).register(&lua).unwrap();

        lua.load(
            r#"
            log.debug("debug")
            log.info("info")
            log.warning("warning")
            log.error("error")
            "#,
        )
        .exec()
        .unwrap();

        let logs = messages.lock().unwrap();
        assert_eq!(logs.len(), 4);
        assert_eq!(logs[0], (LogLevel::Debug, "debug".to_string()));
        assert_eq!(logs[1].0, LogLevel::Info);
        assert_eq!(logs[2].0, LogLevel::Warning);
        assert_eq!(logs[3], (LogLevel::Error, "error".to_string()));
    }
}
