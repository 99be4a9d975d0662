//! Record serializers used by the delivery contract

use serde::Deserialize;
use sluice_core::domain::record::Record;

/// Turns a record into the bytes a transport ships
pub trait RecordSerializer: Send + Sync {
    fn serialize(&self, record: &Record) -> Result<Vec<u8>, String>;
}

/// What part of the record is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonPayload {
    /// Header and value, so the receiver can rebuild the record
    #[default]
    Record,
    /// Only the field tree
    Value,
}

/// JSON serializer
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRecordSerializer {
    payload: JsonPayload,
}

impl JsonRecordSerializer {
    pub fn new(payload: JsonPayload) -> Self {
        Self { payload }
    }
}

impl RecordSerializer for JsonRecordSerializer {
    fn serialize(&self, record: &Record) -> Result<Vec<u8>, String> {
        let bytes = match self.payload {
            JsonPayload::Record => serde_json::to_vec(record),
            JsonPayload::Value => serde_json::to_vec(&record.value),
        };
        bytes.map_err(|e| e.to_string())
    }
}
