//! Record and batch domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Record metadata
///
/// `source_id` identifies where in the origin the record came from and is
/// never rewritten by error routing. The error fields are only populated on
/// the copy handed to the error sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordHeader {
    pub source_id: String,
    pub stage_creator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_timestamp: Option<DateTime<Utc>>,
}

/// A single record flowing through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub header: RecordHeader,
    /// The record's field tree
    pub value: JsonValue,
}

impl Record {
    /// Creates a record produced by `stage_creator`
    pub fn new(
        stage_creator: impl Into<String>,
        source_id: impl Into<String>,
        value: JsonValue,
    ) -> Self {
        Self {
            header: RecordHeader {
                source_id: source_id.into(),
                stage_creator: stage_creator.into(),
                error_stage: None,
                error_code: None,
                error_message: None,
                error_timestamp: None,
            },
            value,
        }
    }

    /// Returns the field at a `/`-separated path, if present
    ///
    /// An empty path (or `/`) addresses the root value.
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        let mut current = &self.value;
        for segment in path_segments(path) {
            current = match current {
                JsonValue::Object(map) => map.get(segment)?,
                JsonValue::Array(list) => list.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Returns `true` if a field exists at `path`
    pub fn has(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Sets the field at `path`, creating intermediate maps as needed
    ///
    /// Returns the previous value. Fails if an intermediate field exists but
    /// is not a map.
    pub fn set(&mut self, path: &str, value: JsonValue) -> Result<Option<JsonValue>, String> {
        let segments: Vec<&str> = path_segments(path).collect();
        let Some((last, parents)) = segments.split_last() else {
            return Ok(Some(std::mem::replace(&mut self.value, value)));
        };

        let mut current = &mut self.value;
        for segment in parents {
            if current.is_null() {
                *current = JsonValue::Object(Default::default());
            }
            let JsonValue::Object(map) = current else {
                return Err(format!("field '{}' is not a map", segment));
            };
            current = map
                .entry(segment.to_string())
                .or_insert_with(|| JsonValue::Object(Default::default()));
        }

        if current.is_null() {
            *current = JsonValue::Object(Default::default());
        }
        match current {
            JsonValue::Object(map) => Ok(map.insert(last.to_string(), value)),
            _ => Err(format!("parent of '{}' is not a map", path)),
        }
    }

    /// Removes the field at `path`, returning it
    pub fn delete(&mut self, path: &str) -> Option<JsonValue> {
        let segments: Vec<&str> = path_segments(path).collect();
        let (last, parents) = segments.split_last()?;

        let mut current = &mut self.value;
        for segment in parents {
            current = match current {
                JsonValue::Object(map) => map.get_mut(*segment)?,
                _ => return None,
            };
        }
        match current {
            JsonValue::Object(map) => map.remove(*last),
            _ => None,
        }
    }

    /// Returns a copy of this record annotated for the error sink
    pub fn to_error_copy(&self, stage: &str, error_code: &str, cause: &str) -> Record {
        let mut copy = self.clone();
        copy.header.error_stage = Some(stage.to_string());
        copy.header.error_code = Some(error_code.to_string());
        copy.header.error_message = Some(cause.to_string());
        copy.header.error_timestamp = Some(Utc::now());
        copy
    }
}

fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// An ordered, finite group of records processed together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Offset of the source after producing this batch
    pub source_offset: Option<String>,
    pub records: Vec<Record>,
}

impl Batch {
    pub fn new(source_offset: Option<String>, records: Vec<Record>) -> Self {
        Self {
            source_offset,
            records,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
