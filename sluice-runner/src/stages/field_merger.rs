//! Field merger processor
//!
//! Merges a list or map field (`from`) into another field (`to`) and removes
//! the source. When `to` does not exist the source is simply moved. Maps are
//! merged key by key, lists are appended. A failed merge sends the unmodified
//! record through the pipeline's record error policy.

use serde::Deserialize;
use serde_json::Value as JsonValue;
use sluice_core::domain::pipeline::StageConfiguration;
use sluice_core::domain::record::{Batch, Record};
use sluice_core::stage::{Processor, StageContext, StageError};

use super::parse_config;

/// A source field is missing and the precondition policy is `ToError`
pub const MISSING_SOURCE: &str = "FIELD_MERGER_00";
/// A map key already exists in the target and overwriting is off
pub const OVERWRITE_REQUIRED: &str = "FIELD_MERGER_01";
/// Source and target are not both maps or both lists
pub const TYPE_MISMATCH: &str = "FIELD_MERGER_02";
/// The source field to move is neither a map nor a list
pub const NOT_A_CONTAINER: &str = "FIELD_MERGER_03";
/// The target path could not be written
pub const CANNOT_SET: &str = "FIELD_MERGER_04";

#[derive(Debug, Clone, Deserialize)]
pub struct FieldMerge {
    pub from: String,
    pub to: String,
}

/// What to do when a `from` field is missing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnMissingField {
    /// Pass the record on untouched for that mapping
    Continue,
    /// Treat the record as failed
    #[default]
    ToError,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldMergerConfig {
    pub mappings: Vec<FieldMerge>,
    #[serde(default)]
    pub on_missing_field: OnMissingField,
    #[serde(default)]
    pub overwrite_existing: bool,
}

pub struct FieldMergerProcessor {
    config: FieldMergerConfig,
}

struct MergeFailure {
    code: &'static str,
    cause: String,
}

impl MergeFailure {
    fn new(code: &'static str, cause: impl Into<String>) -> Self {
        Self {
            code,
            cause: cause.into(),
        }
    }
}

fn is_container(value: &JsonValue) -> bool {
    value.is_object() || value.is_array()
}

fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "list",
        JsonValue::Object(_) => "map",
    }
}

impl FieldMergerProcessor {
    pub fn new(config: FieldMergerConfig) -> Self {
        Self { config }
    }

    pub fn from_stage(stage: &StageConfiguration) -> Result<Self, StageError> {
        let config: FieldMergerConfig = parse_config(stage)?;
        if config.mappings.is_empty() {
            return Err(StageError::config(&stage.instance_name, "no mappings configured"));
        }
        Ok(Self::new(config))
    }

    fn merge(&self, record: &mut Record) -> Result<(), MergeFailure> {
        let mut missing = Vec::new();
        let mut conflicts = Vec::new();

        for mapping in &self.config.mappings {
            let Some(from) = record.get(&mapping.from).cloned() else {
                missing.push(mapping.from.as_str());
                continue;
            };

            match record.get(&mapping.to).cloned() {
                None => {
                    if !is_container(&from) {
                        return Err(MergeFailure::new(
                            NOT_A_CONTAINER,
                            format!("'{}' is a {}, not a list or map", mapping.from, type_name(&from)),
                        ));
                    }
                    record
                        .set(&mapping.to, from)
                        .map_err(|e| MergeFailure::new(CANNOT_SET, e))?;
                }
                Some(to) => match (from, to) {
                    (JsonValue::Object(entries), JsonValue::Object(_)) => {
                        for (key, value) in entries {
                            let path = format!("{}/{}", mapping.to, key);
                            if record.has(&path) && !self.config.overwrite_existing {
                                conflicts.push(mapping.to.as_str());
                                continue;
                            }
                            record
                                .set(&path, value)
                                .map_err(|e| MergeFailure::new(CANNOT_SET, e))?;
                        }
                    }
                    (JsonValue::Array(items), JsonValue::Array(mut existing)) => {
                        existing.extend(items);
                        record
                            .set(&mapping.to, JsonValue::Array(existing))
                            .map_err(|e| MergeFailure::new(CANNOT_SET, e))?;
                    }
                    (from, to) => {
                        return Err(MergeFailure::new(
                            TYPE_MISMATCH,
                            format!(
                                "cannot merge {} '{}' into {} '{}'",
                                type_name(&from),
                                mapping.from,
                                type_name(&to),
                                mapping.to
                            ),
                        ));
                    }
                },
            }
            record.delete(&mapping.from);
        }

        if self.config.on_missing_field == OnMissingField::ToError && !missing.is_empty() {
            return Err(MergeFailure::new(
                MISSING_SOURCE,
                format!("fields do not exist: {}", missing.join(", ")),
            ));
        }
        if !conflicts.is_empty() {
            conflicts.dedup();
            return Err(MergeFailure::new(
                OVERWRITE_REQUIRED,
                format!("merging would overwrite existing keys of: {}", conflicts.join(", ")),
            ));
        }
        Ok(())
    }
}

impl Processor for FieldMergerProcessor {
    fn process(&mut self, batch: Batch, ctx: StageContext<'_>) -> Result<Batch, StageError> {
        let mut output = Vec::with_capacity(batch.len());
        for record in batch.records {
            let mut merged = record.clone();
            match self.merge(&mut merged) {
                Ok(()) => output.push(merged),
                Err(failure) => ctx.handle_failed_record(record, failure.code, &failure.cause)?,
            }
        }
        Ok(Batch::new(batch.source_offset, output))
    }
}
