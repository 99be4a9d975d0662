//! Development data source
//!
//! Emits copies of a configured field template, numbering each record with a
//! sequence field. The offset is the count of records produced so far, so a
//! restarted pipeline resumes where the committed offset left off.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use sluice_core::domain::pipeline::StageConfiguration;
use sluice_core::domain::record::{Batch, Record};
use sluice_core::stage::{Source, StageContext, StageError};
use std::time::Duration;

use super::parse_config;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DevDataConfig {
    /// Fields copied into every record
    #[serde(default)]
    pub fields: Map<String, JsonValue>,
    /// Name of the sequence field added to every record
    #[serde(default = "default_sequence_field")]
    pub sequence_field: String,
    /// Total records to produce; unlimited when unset
    #[serde(default)]
    pub limit: Option<u64>,
    /// Records per batch, capped by the pipeline's max batch size
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause before producing each batch
    #[serde(default)]
    pub delay_ms: u64,
}

fn default_sequence_field() -> String {
    "seq".to_string()
}

fn default_batch_size() -> usize {
    100
}

pub struct DevDataSource {
    stage: String,
    config: DevDataConfig,
}

impl DevDataSource {
    pub fn new(stage: impl Into<String>, config: DevDataConfig) -> Self {
        Self {
            stage: stage.into(),
            config,
        }
    }

    pub fn from_stage(stage: &StageConfiguration) -> Result<Self, StageError> {
        let config: DevDataConfig = parse_config(stage)?;
        if config.batch_size == 0 {
            return Err(StageError::config(
                &stage.instance_name,
                "batch_size must be greater than 0",
            ));
        }
        Ok(Self::new(&stage.instance_name, config))
    }
}

#[async_trait]
impl Source for DevDataSource {
    async fn produce(
        &mut self,
        last_offset: Option<&str>,
        max_batch_size: usize,
        _ctx: StageContext<'_>,
    ) -> Result<Option<Batch>, StageError> {
        let produced: u64 = match last_offset {
            Some(offset) => offset.parse().map_err(|_| {
                StageError::failed(&self.stage, format!("invalid offset '{}'", offset))
            })?,
            None => 0,
        };

        let mut count = self.config.batch_size.min(max_batch_size.max(1)) as u64;
        if let Some(limit) = self.config.limit {
            if produced >= limit {
                return Ok(None);
            }
            count = count.min(limit - produced);
        }

        if self.config.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.delay_ms)).await;
        }

        let records = (produced..produced + count)
            .map(|seq| {
                let mut fields = self.config.fields.clone();
                fields.insert(self.config.sequence_field.clone(), JsonValue::from(seq));
                Record::new(&self.stage, seq.to_string(), JsonValue::Object(fields))
            })
            .collect();

        Ok(Some(Batch::new(Some((produced + count).to_string()), records)))
    }
}
