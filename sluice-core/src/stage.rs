//! Stage contracts
//!
//! Every node of a pipeline graph implements one of [`Source`], [`Processor`]
//! or [`Target`]. Stages never talk to the runner directly: they receive a
//! [`StageContext`] carrying the pipeline-wide record error policy and the
//! error sink, and report fatal problems through [`StageError`].

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::pipeline::OnRecordError;
use crate::domain::record::{Batch, Record};

/// Errors raised by stages
#[derive(Debug, Error)]
pub enum StageError {
    /// A record could not be processed or delivered and the policy is `StopPipeline`
    #[error("record '{record_id}' failed in stage '{stage}' ({error_code}): {cause}")]
    RecordDelivery {
        stage: String,
        record_id: String,
        error_code: String,
        cause: String,
    },

    /// A whole batch could not be delivered after exhausting retries
    #[error("batch could not be delivered by stage '{stage}' after {attempts} attempt(s): {cause}")]
    BatchDelivery {
        stage: String,
        attempts: u32,
        cause: String,
    },

    /// Stage configuration is invalid
    #[error("invalid configuration for stage '{stage}': {message}")]
    Config { stage: String, message: String },

    /// Any other stage failure; always fatal for the batch
    #[error("stage '{stage}' failed: {message}")]
    Failed { stage: String, message: String },
}

impl StageError {
    pub fn config(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            stage: stage.into(),
            message: message.into(),
        }
    }

    pub fn failed(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

/// Destination for records that could not be processed or delivered
pub trait ErrorSink: Send + Sync {
    /// Quarantines `record`, which failed in `stage` with `error_code` / `cause`
    fn to_error(&self, stage: &str, record: Record, error_code: &str, cause: &str);
}

/// Per-stage view of the pipeline handed to every stage call
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    pub stage: &'a str,
    pub on_record_error: OnRecordError,
    pub errors: &'a dyn ErrorSink,
}

impl<'a> StageContext<'a> {
    pub fn new(stage: &'a str, on_record_error: OnRecordError, errors: &'a dyn ErrorSink) -> Self {
        Self {
            stage,
            on_record_error,
            errors,
        }
    }

    /// Applies the pipeline's record error policy to a failed record
    ///
    /// Returns an error only under `StopPipeline`; the caller must then
    /// abandon the rest of the batch.
    pub fn handle_failed_record(
        &self,
        record: Record,
        error_code: &str,
        cause: &str,
    ) -> Result<(), StageError> {
        match self.on_record_error {
            OnRecordError::Discard => {
                tracing::debug!(
                    "Stage '{}' discarding record '{}': {}",
                    self.stage,
                    record.header.source_id,
                    cause
                );
                Ok(())
            }
            OnRecordError::ToError => {
                self.errors.to_error(self.stage, record, error_code, cause);
                Ok(())
            }
            OnRecordError::StopPipeline => Err(StageError::RecordDelivery {
                stage: self.stage.to_string(),
                record_id: record.header.source_id,
                error_code: error_code.to_string(),
                cause: cause.to_string(),
            }),
        }
    }
}

/// Origin of a pipeline's records
#[async_trait]
pub trait Source: Send {
    /// Produces the batch following `last_offset`
    ///
    /// Returns `Ok(None)` once the source is exhausted.
    async fn produce(
        &mut self,
        last_offset: Option<&str>,
        max_batch_size: usize,
        ctx: StageContext<'_>,
    ) -> Result<Option<Batch>, StageError>;
}

/// Transforms a batch into a new batch
pub trait Processor: Send {
    fn process(&mut self, batch: Batch, ctx: StageContext<'_>) -> Result<Batch, StageError>;
}

/// Terminal stage delivering records to an external system
#[async_trait]
pub trait Target: Send {
    async fn write(&mut self, batch: &Batch, ctx: StageContext<'_>) -> Result<(), StageError>;

    /// Releases external resources; called once when the run ends
    fn destroy(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        records: Mutex<Vec<(String, Record, String)>>,
    }

    impl ErrorSink for CollectingSink {
        fn to_error(&self, stage: &str, record: Record, error_code: &str, _cause: &str) {
            self.records
                .lock()
                .unwrap()
                .push((stage.to_string(), record, error_code.to_string()));
        }
    }

    fn record() -> Record {
        Record::new("origin", "offset-7", json!({ "id": 7 }))
    }

    #[test]
    fn test_discard_drops_record() {
        let sink = CollectingSink::default();
        let ctx = StageContext::new("target", OnRecordError::Discard, &sink);
        assert!(ctx.handle_failed_record(record(), "E1", "bad").is_ok());
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[test]
    fn test_to_error_routes_record() {
        let sink = CollectingSink::default();
        let ctx = StageContext::new("target", OnRecordError::ToError, &sink);
        assert!(ctx.handle_failed_record(record(), "E1", "bad").is_ok());

        let routed = sink.records.lock().unwrap();
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].0, "target");
        assert_eq!(routed[0].1.header.source_id, "offset-7");
        assert_eq!(routed[0].2, "E1");
    }

    #[test]
    fn test_stop_pipeline_raises() {
        let sink = CollectingSink::default();
        let ctx = StageContext::new("target", OnRecordError::StopPipeline, &sink);
        let err = ctx.handle_failed_record(record(), "E1", "bad").unwrap_err();
        assert!(matches!(err, StageError::RecordDelivery { ref record_id, .. } if record_id == "offset-7"));
        assert!(sink.records.lock().unwrap().is_empty());
    }
}
