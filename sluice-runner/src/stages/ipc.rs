//! IPC target
//!
//! Ships batches to one or more IPC endpoints through the delivery contract,
//! failing over between hosts when a submission fails.

use async_trait::async_trait;
use serde::Deserialize;
use sluice_client::HttpIpcTransport;
use sluice_core::domain::pipeline::StageConfiguration;
use sluice_core::domain::record::Batch;
use sluice_core::stage::{StageContext, StageError, Target};
use sluice_core::transport::DeliveryTransport;
use std::sync::Arc;
use tracing::info;

use super::parse_config;
use crate::delivery::{
    DEFAULT_CHUNK_SIZE, DeliveryContract, EndpointPool, JsonPayload, JsonRecordSerializer,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IpcConfig {
    /// `host:port` endpoints of the receiving application
    pub hosts: Vec<String>,
    /// Application id the receiver checks on every request
    pub app_id: String,
    #[serde(default = "default_retries")]
    pub retries_per_batch: u32,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub payload: JsonPayload,
}

fn default_retries() -> u32 {
    3
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

pub struct IpcTarget {
    contract: DeliveryContract,
}

impl IpcTarget {
    /// Builds the target from its stage configuration, using HTTP transport
    pub fn from_stage(stage: &StageConfiguration) -> Result<Self, StageError> {
        let config: IpcConfig = parse_config(stage)?;
        if config.app_id.trim().is_empty() {
            return Err(StageError::config(&stage.instance_name, "app_id must not be empty"));
        }
        let transport = Arc::new(HttpIpcTransport::new(&config.app_id));
        Self::with_transport(stage, config, transport)
    }

    pub fn with_transport(
        stage: &StageConfiguration,
        config: IpcConfig,
        transport: Arc<dyn DeliveryTransport>,
    ) -> Result<Self, StageError> {
        if config.chunk_size == 0 {
            return Err(StageError::config(
                &stage.instance_name,
                "chunk_size must be greater than 0",
            ));
        }
        let pool = EndpointPool::new(config.hosts)
            .ok_or_else(|| StageError::config(&stage.instance_name, "no hosts configured"))?;

        info!(
            "Stage '{}' delivering to {} active of {} host(s)",
            stage.instance_name,
            pool.active().len(),
            pool.total()
        );

        let serializer = Arc::new(JsonRecordSerializer::new(config.payload));
        Ok(Self {
            contract: DeliveryContract::new(
                transport,
                serializer,
                pool,
                config.chunk_size,
                config.retries_per_batch,
            ),
        })
    }
}

#[async_trait]
impl Target for IpcTarget {
    async fn write(&mut self, batch: &Batch, ctx: StageContext<'_>) -> Result<(), StageError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.contract.deliver(batch, ctx).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sluice_core::domain::pipeline::OnRecordError;
    use sluice_core::domain::record::Record;
    use sluice_core::stage::ErrorSink;
    use sluice_core::transport::{SubmitOutcome, TransportError};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingTransport {
        sizes: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl DeliveryTransport for CountingTransport {
        async fn submit_batch(
            &self,
            _endpoint: &str,
            entries: &[Vec<u8>],
        ) -> Result<SubmitOutcome, TransportError> {
            self.sizes.lock().unwrap().push(entries.len());
            Ok(SubmitOutcome::batch_ok())
        }
    }

    struct NoErrors;

    impl ErrorSink for NoErrors {
        fn to_error(&self, _: &str, _: Record, _: &str, _: &str) {}
    }

    fn stage(config: serde_json::Value) -> StageConfiguration {
        StageConfiguration::new("ipc", "ipc", config)
    }

    #[tokio::test]
    async fn test_writes_in_configured_chunks() {
        let stage = stage(json!({ "hosts": ["a:1", "b:2"], "app_id": "app", "chunk_size": 2 }));
        let config = parse_config(&stage).unwrap();
        let transport = Arc::new(CountingTransport::default());
        let mut target = IpcTarget::with_transport(&stage, config, transport.clone()).unwrap();

        let records = (0..5)
            .map(|i| Record::new("origin", i.to_string(), json!({ "i": i })))
            .collect();
        let ctx = StageContext::new("ipc", OnRecordError::ToError, &NoErrors);
        target.write(&Batch::new(None, records), ctx).await.unwrap();
        target.write(&Batch::new(None, Vec::new()), ctx).await.unwrap();

        assert_eq!(*transport.sizes.lock().unwrap(), vec![2, 2, 1]);
    }

    #[test]
    fn test_config_validation() {
        assert!(IpcTarget::from_stage(&stage(json!({ "hosts": [], "app_id": "app" }))).is_err());
        assert!(IpcTarget::from_stage(&stage(json!({ "hosts": ["a:1"], "app_id": " " }))).is_err());
        assert!(IpcTarget::from_stage(&stage(json!({ "hosts": ["a:1"] }))).is_err());
        assert!(
            IpcTarget::from_stage(&stage(json!({
                "hosts": ["a:1"], "app_id": "app", "chunk_size": 0
            })))
            .is_err()
        );

        let config: IpcConfig =
            parse_config(&stage(json!({ "hosts": ["a:1"], "app_id": "app", "payload": "value" })))
                .unwrap();
        assert_eq!(config.retries_per_batch, 3);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.payload, JsonPayload::Value);
    }
}
