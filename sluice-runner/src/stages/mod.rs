//! Built-in stages
//!
//! Each stage parses its own `config` object from the pipeline definition.

pub mod dev_data;
pub mod field_merger;
pub mod ipc;
pub mod trash;

pub use dev_data::DevDataSource;
pub use field_merger::FieldMergerProcessor;
pub use ipc::IpcTarget;
pub use trash::TrashTarget;

use serde::de::DeserializeOwned;
use sluice_core::domain::pipeline::StageConfiguration;
use sluice_core::stage::StageError;

/// Parses a stage's `config` object; a missing config parses as `{}`
pub(crate) fn parse_config<T: DeserializeOwned>(stage: &StageConfiguration) -> Result<T, StageError> {
    let value = if stage.config.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        stage.config.clone()
    };
    serde_json::from_value(value).map_err(|e| StageError::config(&stage.instance_name, e.to_string()))
}
