//! Lua script processor
//!
//! Runs a user script against every batch flowing through the stage. In
//! record mode the script defines `process(record)` and is called once per
//! record; in batch mode it defines `process_batch(records)` and receives the
//! whole batch as a list.
//!
//! Records are handed to Lua as tables of the form
//! `{ id = "<source id>", stage_creator = "<stage>", value = <field tree> }`.
//! Only `value` is read back; headers are preserved by the processor.

use std::collections::HashMap;

use mlua::{Function, Lua, LuaSerdeExt, Table, Value as LuaValue};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use sluice_core::domain::record::{Batch, Record, RecordHeader};
use sluice_core::stage::{Processor, StageContext, StageError};

use crate::module::ModuleRegistry;
use crate::modules::{LogModule, TracingLogSink};
use crate::sandbox::create_sandbox;

/// Error code for records whose script invocation raised
pub const SCRIPT_ERROR: &str = "SCRIPT_01";
/// Error code for records the script returned in an unusable shape
pub const SCRIPT_INVALID_OUTPUT: &str = "SCRIPT_02";

/// How the script is invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// `process(record)` once per record
    #[default]
    Record,
    /// `process_batch(records)` once per batch
    Batch,
}

impl ProcessingMode {
    /// Name of the global function the script must define
    pub fn entry_point(self) -> &'static str {
        match self {
            ProcessingMode::Record => "process",
            ProcessingMode::Batch => "process_batch",
        }
    }
}

/// Processor stage backed by a sandboxed Lua script
pub struct ScriptProcessor {
    stage: String,
    lua: Lua,
    mode: ProcessingMode,
}

impl ScriptProcessor {
    /// Loads `script` into a fresh sandbox
    ///
    /// # Arguments
    /// * `stage` - Instance name of the stage, used for logging and errors
    /// * `script` - Lua source defining the entry point for `mode`
    /// * `mode` - Record or batch processing
    ///
    /// # Errors
    /// Returns `StageError::Config` if the script does not load or does not
    /// define the entry point.
    pub fn new(stage: &str, script: &str, mode: ProcessingMode) -> Result<Self, StageError> {
        let lua = create_sandbox()
            .map_err(|e| StageError::config(stage, format!("failed to create sandbox: {}", e)))?;

        let mut registry = ModuleRegistry::new();
        registry.register(LogModule::new(TracingLogSink::new(stage)));
        registry
            .register_all(&lua)
            .map_err(|e| StageError::config(stage, format!("failed to register modules: {}", e)))?;

        lua.load(script)
            .set_name(stage)
            .exec()
            .map_err(|e| StageError::config(stage, format!("script failed to load: {}", e)))?;

        let entry: Option<Function> = lua.globals().get(mode.entry_point()).map_err(|e| {
            StageError::config(
                stage,
                format!("'{}' is not a function: {}", mode.entry_point(), e),
            )
        })?;
        if entry.is_none() {
            return Err(StageError::config(
                stage,
                format!("script does not define '{}'", mode.entry_point()),
            ));
        }

        tracing::debug!("Loaded script for stage '{}' in {:?} mode", stage, mode);

        Ok(Self {
            stage: stage.to_string(),
            lua,
            mode,
        })
    }

    fn entry_point(&self) -> Result<Function, StageError> {
        self.lua
            .globals()
            .get(self.mode.entry_point())
            .map_err(|e| StageError::failed(&self.stage, e.to_string()))
    }

    fn to_lua(&self, record: &Record) -> mlua::Result<Table> {
        let table = self.lua.create_table()?;
        table.set("id", record.header.source_id.as_str())?;
        table.set("stage_creator", record.header.stage_creator.as_str())?;
        table.set("value", self.lua.to_value(&record.value)?)?;
        Ok(table)
    }

    fn value_of(&self, table: &Table) -> mlua::Result<JsonValue> {
        let value: LuaValue = table.get("value")?;
        self.lua.from_value(value)
    }

    fn process_records(&self, batch: Batch, ctx: StageContext<'_>) -> Result<Batch, StageError> {
        let process = self.entry_point()?;
        let mut output = Vec::with_capacity(batch.len());

        for mut record in batch.records {
            let returned = self
                .to_lua(&record)
                .and_then(|table| process.call::<Option<Table>>(table));

            match returned {
                Ok(Some(table)) => match self.value_of(&table) {
                    Ok(value) => {
                        record.value = value;
                        output.push(record);
                    }
                    Err(e) => {
                        ctx.handle_failed_record(record, SCRIPT_INVALID_OUTPUT, &e.to_string())?
                    }
                },
                Ok(None) => {
                    tracing::debug!(
                        "Script in stage '{}' dropped record '{}'",
                        self.stage,
                        record.header.source_id
                    );
                }
                Err(e) => ctx.handle_failed_record(record, SCRIPT_ERROR, &e.to_string())?,
            }
        }

        Ok(Batch::new(batch.source_offset, output))
    }

    /// The script owns record error handling in batch mode; a raised error
    /// fails the whole batch.
    fn process_whole_batch(&self, batch: Batch) -> Result<Batch, StageError> {
        let process_batch = self.entry_point()?;
        let fail = |e: mlua::Error| StageError::failed(&self.stage, e.to_string());

        let input = self.lua.create_table().map_err(fail)?;
        let mut headers: HashMap<String, RecordHeader> = HashMap::with_capacity(batch.len());
        for (i, record) in batch.records.iter().enumerate() {
            input.set(i + 1, self.to_lua(record).map_err(fail)?).map_err(fail)?;
            headers.insert(record.header.source_id.clone(), record.header.clone());
        }

        let returned: Table = process_batch.call(input).map_err(fail)?;

        let mut output = Vec::new();
        for (index, entry) in returned.sequence_values::<Table>().enumerate() {
            let entry = entry.map_err(fail)?;
            let value = self.value_of(&entry).map_err(fail)?;
            let id: Option<String> = entry.get("id").map_err(fail)?;

            let record = match id.as_ref().and_then(|id| headers.get(id)) {
                Some(header) => Record {
                    header: header.clone(),
                    value,
                },
                None => Record::new(&self.stage, format!("{}::{}", self.stage, index), value),
            };
            output.push(record);
        }

        Ok(Batch::new(batch.source_offset, output))
    }
}

impl Processor for ScriptProcessor {
    fn process(&mut self, batch: Batch, ctx: StageContext<'_>) -> Result<Batch, StageError> {
        match self.mode {
            ProcessingMode::Record => self.process_records(batch, ctx),
            ProcessingMode::Batch => self.process_whole_batch(batch),
        }
    }
}
