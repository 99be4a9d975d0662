//! Delivery transport contract
//!
//! Destination stages deliver serialized records through a
//! [`DeliveryTransport`]. A transport reports either one outcome per
//! submitted entry or a single outcome for the whole request; the runner's
//! delivery contract adapts both shapes into the same retry and record error
//! handling.

use async_trait::async_trait;
use thiserror::Error;

/// Outcome of one entry submitted to a per-record transport
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Delivered,
    /// The destination rejected this entry
    Failed { error_code: String },
}

/// Outcome of one physical submission
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Entry `i` of the result corresponds to entry `i` of the submission
    PerRecord(Vec<RecordOutcome>),
    /// The request succeeded or failed as a whole
    Batch {
        success: bool,
        error_detail: Option<String>,
    },
}

impl SubmitOutcome {
    pub fn batch_ok() -> Self {
        Self::Batch {
            success: true,
            error_detail: None,
        }
    }

    pub fn batch_failed(detail: impl Into<String>) -> Self {
        Self::Batch {
            success: false,
            error_detail: Some(detail.into()),
        }
    }
}

/// Transport-level failure (connection refused, timeout, ...)
#[derive(Debug, Error)]
#[error("transport error on '{endpoint}': {message}")]
pub struct TransportError {
    pub endpoint: String,
    pub message: String,
}

impl TransportError {
    pub fn new(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }
}

/// Capability a destination stage uses to ship serialized records
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    /// Submits `entries` (in order) to `endpoint`
    ///
    /// Per-record transports that address a single destination may ignore
    /// `endpoint`.
    async fn submit_batch(
        &self,
        endpoint: &str,
        entries: &[Vec<u8>],
    ) -> Result<SubmitOutcome, TransportError>;
}
