//! Sink delivery contract
//!
//! Shared by every destination stage that ships records through a
//! [`DeliveryTransport`]:
//! 1. every record of the batch is serialized first, in order; a record that
//!    fails to serialize goes through the pipeline's record error policy
//! 2. serialized entries are submitted in chunks of at most `chunk_size`
//! 3. per-record outcomes apply the record error policy to failed positions
//! 4. whole-request failures are retried with endpoint failover; once retries
//!    are exhausted every record of the chunk goes through the policy

pub mod failover;
pub mod serializer;

pub use failover::EndpointPool;
pub use serializer::{JsonPayload, JsonRecordSerializer, RecordSerializer};

use sluice_core::domain::pipeline::OnRecordError;
use sluice_core::domain::record::{Batch, Record};
use sluice_core::stage::{StageContext, StageError};
use sluice_core::transport::{DeliveryTransport, RecordOutcome, SubmitOutcome};
use std::sync::Arc;
use tracing::{debug, warn};

/// Error code for records that could not be serialized
pub const SERIALIZATION_FAILED: &str = "DELIVERY_01";
/// Error code for records of a chunk that exhausted its retries
pub const BATCH_DELIVERY_FAILED: &str = "DELIVERY_02";
/// Error code for records the transport returned no outcome for
pub const MISSING_OUTCOME: &str = "DELIVERY_03";

/// Default upper bound of entries per submission
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Counts of one delivery
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// Records handed to the record error policy
    pub failed: usize,
    /// Physical submissions made, retries included
    pub submissions: usize,
}

pub struct DeliveryContract {
    transport: Arc<dyn DeliveryTransport>,
    serializer: Arc<dyn RecordSerializer>,
    pool: EndpointPool,
    chunk_size: usize,
    retries_per_batch: u32,
}

impl DeliveryContract {
    /// # Arguments
    /// * `transport` - How entries are shipped
    /// * `serializer` - How records become entries
    /// * `pool` - Endpoints the transport is pointed at
    /// * `chunk_size` - Maximum entries per submission (at least 1)
    /// * `retries_per_batch` - Extra attempts for a chunk after a whole-request failure
    pub fn new(
        transport: Arc<dyn DeliveryTransport>,
        serializer: Arc<dyn RecordSerializer>,
        pool: EndpointPool,
        chunk_size: usize,
        retries_per_batch: u32,
    ) -> Self {
        Self {
            transport,
            serializer,
            pool,
            chunk_size: chunk_size.max(1),
            retries_per_batch,
        }
    }

    /// Delivers `batch`, applying the record error policy of `ctx`
    ///
    /// # Errors
    /// Only under `StopPipeline`: `RecordDelivery` for the first failed record,
    /// or `BatchDelivery` when a chunk exhausted its retries.
    pub async fn deliver(
        &mut self,
        batch: &Batch,
        ctx: StageContext<'_>,
    ) -> Result<DeliveryReport, StageError> {
        let mut report = DeliveryReport::default();
        let mut entries = Vec::with_capacity(batch.len());
        let mut records = Vec::with_capacity(batch.len());

        for record in &batch.records {
            match self.serializer.serialize(record) {
                Ok(entry) => {
                    entries.push(entry);
                    records.push(record);
                }
                Err(cause) => {
                    report.failed += 1;
                    ctx.handle_failed_record(record.clone(), SERIALIZATION_FAILED, &cause)?;
                }
            }
        }

        for (chunk, chunk_records) in entries
            .chunks(self.chunk_size)
            .zip(records.chunks(self.chunk_size))
        {
            self.deliver_chunk(chunk, chunk_records, ctx, &mut report)
                .await?;
        }

        debug!(
            "Stage '{}' delivered {} record(s), {} failed, {} submission(s)",
            ctx.stage, report.delivered, report.failed, report.submissions
        );
        Ok(report)
    }

    async fn deliver_chunk(
        &mut self,
        entries: &[Vec<u8>],
        records: &[&Record],
        ctx: StageContext<'_>,
        report: &mut DeliveryReport,
    ) -> Result<(), StageError> {
        let mut attempt: u32 = 0;
        let mut previous_failed = false;

        let cause = loop {
            let endpoint = self.pool.next(previous_failed).to_string();
            report.submissions += 1;

            let cause = match self.transport.submit_batch(&endpoint, entries).await {
                Ok(SubmitOutcome::PerRecord(outcomes)) => {
                    return Self::apply_outcomes(records, &outcomes, ctx, report);
                }
                Ok(SubmitOutcome::Batch { success: true, .. }) => {
                    report.delivered += entries.len();
                    return Ok(());
                }
                Ok(SubmitOutcome::Batch { error_detail, .. }) => {
                    error_detail.unwrap_or_else(|| format!("'{}' rejected the batch", endpoint))
                }
                Err(e) => e.to_string(),
            };

            if attempt >= self.retries_per_batch {
                break cause;
            }
            attempt += 1;
            previous_failed = true;
            warn!(
                "Stage '{}' failed to deliver {} record(s) to '{}' ({}), retry {}/{}",
                ctx.stage,
                entries.len(),
                endpoint,
                cause,
                attempt,
                self.retries_per_batch
            );
        };

        if ctx.on_record_error == OnRecordError::StopPipeline {
            return Err(StageError::BatchDelivery {
                stage: ctx.stage.to_string(),
                attempts: attempt + 1,
                cause,
            });
        }

        warn!(
            "Stage '{}' gave up on {} record(s) after {} attempt(s): {}",
            ctx.stage,
            records.len(),
            attempt + 1,
            cause
        );
        for record in records {
            report.failed += 1;
            ctx.handle_failed_record((*record).clone(), BATCH_DELIVERY_FAILED, &cause)?;
        }
        Ok(())
    }

    /// Outcome `i` belongs to record `i`; records past the end of `outcomes`
    /// count as failed.
    fn apply_outcomes(
        records: &[&Record],
        outcomes: &[RecordOutcome],
        ctx: StageContext<'_>,
        report: &mut DeliveryReport,
    ) -> Result<(), StageError> {
        for (i, record) in records.iter().enumerate() {
            match outcomes.get(i) {
                Some(RecordOutcome::Delivered) => report.delivered += 1,
                Some(RecordOutcome::Failed { error_code }) => {
                    report.failed += 1;
                    ctx.handle_failed_record(
                        (*record).clone(),
                        error_code,
                        "rejected by destination",
                    )?;
                }
                None => {
                    report.failed += 1;
                    ctx.handle_failed_record(
                        (*record).clone(),
                        MISSING_OUTCOME,
                        "destination returned no outcome",
                    )?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use sluice_core::stage::ErrorSink;
    use sluice_core::transport::TransportError;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Transport recording every submission and answering from a script
    #[derive(Default)]
    struct ScriptedTransport {
        submissions: Mutex<Vec<(String, Vec<Vec<u8>>)>>,
        answers: Mutex<VecDeque<Result<SubmitOutcome, TransportError>>>,
    }

    impl ScriptedTransport {
        fn answering(answers: Vec<Result<SubmitOutcome, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                submissions: Mutex::new(Vec::new()),
                answers: Mutex::new(answers.into()),
            })
        }

        fn sizes(&self) -> Vec<usize> {
            self.submissions
                .lock()
                .unwrap()
                .iter()
                .map(|(_, e)| e.len())
                .collect()
        }

        fn endpoints(&self) -> Vec<String> {
            self.submissions
                .lock()
                .unwrap()
                .iter()
                .map(|(e, _)| e.clone())
                .collect()
        }

        fn delivered_ids(&self) -> Vec<String> {
            self.submissions
                .lock()
                .unwrap()
                .iter()
                .flat_map(|(_, entries)| entries.clone())
                .map(|e| {
                    let record: Record = serde_json::from_slice(&e).unwrap();
                    record.header.source_id
                })
                .collect()
        }
    }

    #[async_trait]
    impl DeliveryTransport for ScriptedTransport {
        async fn submit_batch(
            &self,
            endpoint: &str,
            entries: &[Vec<u8>],
        ) -> Result<SubmitOutcome, TransportError> {
            self.submissions
                .lock()
                .unwrap()
                .push((endpoint.to_string(), entries.to_vec()));
            self.answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(SubmitOutcome::batch_ok()))
        }
    }

    /// Fails to serialize records whose `/poison` field is true
    struct PoisonAwareSerializer;

    impl RecordSerializer for PoisonAwareSerializer {
        fn serialize(&self, record: &Record) -> Result<Vec<u8>, String> {
            if record.get("/poison") == Some(&json!(true)) {
                return Err("unserializable field".to_string());
            }
            JsonRecordSerializer::default().serialize(record)
        }
    }

    #[derive(Default)]
    struct CollectingSink(Mutex<Vec<(String, String)>>);

    impl ErrorSink for CollectingSink {
        fn to_error(&self, _stage: &str, record: Record, error_code: &str, _cause: &str) {
            self.0
                .lock()
                .unwrap()
                .push((record.header.source_id, error_code.to_string()));
        }
    }

    fn batch(n: usize, poisoned: &[usize]) -> Batch {
        let records = (1..=n)
            .map(|i| {
                Record::new(
                    "origin",
                    i.to_string(),
                    json!({ "n": i, "poison": poisoned.contains(&i) }),
                )
            })
            .collect();
        Batch::new(Some(n.to_string()), records)
    }

    fn contract(
        transport: Arc<ScriptedTransport>,
        endpoints: usize,
        chunk_size: usize,
        retries: u32,
    ) -> DeliveryContract {
        let pool = EndpointPool::new((0..endpoints).map(|i| format!("h{}:1", i)).collect()).unwrap();
        DeliveryContract::new(
            transport,
            Arc::new(PoisonAwareSerializer),
            pool,
            chunk_size,
            retries,
        )
    }

    #[tokio::test]
    async fn test_serialization_failure_routes_one_record() {
        let transport = ScriptedTransport::answering(vec![]);
        let sink = CollectingSink::default();
        let ctx = StageContext::new("ipc", OnRecordError::ToError, &sink);
        let mut contract = contract(transport.clone(), 1, DEFAULT_CHUNK_SIZE, 0);

        let report = contract.deliver(&batch(10, &[7]), ctx).await.unwrap();

        assert_eq!(report.delivered, 9);
        assert_eq!(report.failed, 1);
        assert_eq!(
            *sink.0.lock().unwrap(),
            vec![("7".to_string(), SERIALIZATION_FAILED.to_string())]
        );
        let expected: Vec<String> = [1, 2, 3, 4, 5, 6, 8, 9, 10].iter().map(|i| i.to_string()).collect();
        assert_eq!(transport.delivered_ids(), expected);
    }

    #[tokio::test]
    async fn test_stop_pipeline_submits_nothing() {
        let transport = ScriptedTransport::answering(vec![]);
        let sink = CollectingSink::default();
        let ctx = StageContext::new("ipc", OnRecordError::StopPipeline, &sink);
        let mut contract = contract(transport.clone(), 1, DEFAULT_CHUNK_SIZE, 0);

        let err = contract.deliver(&batch(10, &[7]), ctx).await.unwrap_err();

        assert!(matches!(err, StageError::RecordDelivery { ref record_id, .. } if record_id == "7"));
        assert!(transport.sizes().is_empty());
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chunking_preserves_order() {
        let transport = ScriptedTransport::answering(vec![]);
        let sink = CollectingSink::default();
        let ctx = StageContext::new("ipc", OnRecordError::ToError, &sink);
        let mut contract = contract(transport.clone(), 1, 500, 0);

        let report = contract.deliver(&batch(1200, &[]), ctx).await.unwrap();

        assert_eq!(transport.sizes(), vec![500, 500, 200]);
        assert_eq!(report.delivered, 1200);
        assert_eq!(report.submissions, 3);
        let expected: Vec<String> = (1..=1200).map(|i| i.to_string()).collect();
        assert_eq!(transport.delivered_ids(), expected);
    }

    #[tokio::test]
    async fn test_per_record_outcomes_are_aligned() {
        let outcomes = (1..=5)
            .map(|i| {
                if i == 2 || i == 4 {
                    RecordOutcome::Failed {
                        error_code: "THROTTLED".to_string(),
                    }
                } else {
                    RecordOutcome::Delivered
                }
            })
            .collect();
        let transport = ScriptedTransport::answering(vec![Ok(SubmitOutcome::PerRecord(outcomes))]);
        let sink = CollectingSink::default();
        let ctx = StageContext::new("kinesis", OnRecordError::ToError, &sink);
        let mut contract = contract(transport, 1, DEFAULT_CHUNK_SIZE, 3);

        let report = contract.deliver(&batch(5, &[]), ctx).await.unwrap();

        assert_eq!(report.delivered, 3);
        assert_eq!(report.submissions, 1);
        let routed = sink.0.lock().unwrap();
        assert_eq!(
            *routed,
            vec![
                ("2".to_string(), "THROTTLED".to_string()),
                ("4".to_string(), "THROTTLED".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_short_outcome_list_fails_remaining_records() {
        let transport = ScriptedTransport::answering(vec![Ok(SubmitOutcome::PerRecord(vec![
            RecordOutcome::Delivered,
        ]))]);
        let sink = CollectingSink::default();
        let ctx = StageContext::new("kinesis", OnRecordError::ToError, &sink);
        let mut contract = contract(transport, 1, DEFAULT_CHUNK_SIZE, 0);

        let report = contract.deliver(&batch(3, &[]), ctx).await.unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 2);
        assert!(sink.0.lock().unwrap().iter().all(|(_, code)| code == MISSING_OUTCOME));
    }

    #[tokio::test]
    async fn test_retry_fails_over_then_succeeds() {
        let transport = ScriptedTransport::answering(vec![
            Err(TransportError::new("h", "connection refused")),
            Ok(SubmitOutcome::batch_failed("status 503")),
            Ok(SubmitOutcome::batch_ok()),
        ]);
        let sink = CollectingSink::default();
        let ctx = StageContext::new("ipc", OnRecordError::StopPipeline, &sink);
        let mut contract = contract(transport.clone(), 6, DEFAULT_CHUNK_SIZE, 3);

        let report = contract.deliver(&batch(4, &[]), ctx).await.unwrap();

        assert_eq!(report.delivered, 4);
        assert_eq!(report.submissions, 3);
        let endpoints = transport.endpoints();
        assert_ne!(endpoints[0], endpoints[1]);
        assert_ne!(endpoints[1], endpoints[2]);
    }

    #[tokio::test]
    async fn test_exhausted_retries_apply_policy_to_chunk() {
        let failures = (0..3)
            .map(|_| Ok(SubmitOutcome::batch_failed("status 500")))
            .collect();
        let transport = ScriptedTransport::answering(failures);
        let sink = CollectingSink::default();
        let ctx = StageContext::new("ipc", OnRecordError::ToError, &sink);
        let mut contract = contract(transport.clone(), 3, DEFAULT_CHUNK_SIZE, 2);

        let report = contract.deliver(&batch(4, &[]), ctx).await.unwrap();

        assert_eq!(report.delivered, 0);
        assert_eq!(report.failed, 4);
        assert_eq!(report.submissions, 3);
        assert!(sink.0.lock().unwrap().iter().all(|(_, code)| code == BATCH_DELIVERY_FAILED));
    }

    #[tokio::test]
    async fn test_exhausted_retries_under_stop_pipeline() {
        let failures = (0..2)
            .map(|_| Err(TransportError::new("h", "timeout")))
            .collect();
        let transport = ScriptedTransport::answering(failures);
        let sink = CollectingSink::default();
        let ctx = StageContext::new("ipc", OnRecordError::StopPipeline, &sink);
        let mut contract = contract(transport, 1, DEFAULT_CHUNK_SIZE, 1);

        let err = contract.deliver(&batch(4, &[]), ctx).await.unwrap_err();

        assert!(matches!(err, StageError::BatchDelivery { attempts: 2, .. }));
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_discard_drops_failed_records() {
        let transport = ScriptedTransport::answering(vec![Ok(SubmitOutcome::batch_failed("no"))]);
        let sink = CollectingSink::default();
        let ctx = StageContext::new("ipc", OnRecordError::Discard, &sink);
        let mut contract = contract(transport, 1, DEFAULT_CHUNK_SIZE, 0);

        let report = contract.deliver(&batch(3, &[]), ctx).await.unwrap();

        assert_eq!(report.failed, 3);
        assert!(sink.0.lock().unwrap().is_empty());
    }
}
