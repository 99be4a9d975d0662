//! Target that discards everything it receives

use async_trait::async_trait;
use sluice_core::domain::record::Batch;
use sluice_core::stage::{StageContext, StageError, Target};
use tracing::trace;

#[derive(Debug, Default)]
pub struct TrashTarget;

#[async_trait]
impl Target for TrashTarget {
    async fn write(&mut self, batch: &Batch, ctx: StageContext<'_>) -> Result<(), StageError> {
        trace!("Stage '{}' discarded {} record(s)", ctx.stage, batch.len());
        Ok(())
    }
}
