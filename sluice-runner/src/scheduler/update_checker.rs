//! Update checker
//!
//! Best effort: a failed check is logged at debug level and the previously
//! fetched information is kept.

use async_trait::async_trait;
use sluice_client::UpdateClient;
use sluice_core::dto::update::{UpdateCheckRequest, UpdateInfo};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

use super::Worker;

pub struct UpdateChecker {
    client: Option<UpdateClient>,
    request: UpdateCheckRequest,
    last: Arc<RwLock<UpdateInfo>>,
}

impl UpdateChecker {
    /// # Arguments
    /// * `client` - Update service client; `None` disables checking
    /// * `request` - Payload describing this runner and pipeline
    /// * `last` - Where the latest answer is published
    pub fn new(
        client: Option<UpdateClient>,
        request: UpdateCheckRequest,
        last: Arc<RwLock<UpdateInfo>>,
    ) -> Self {
        Self {
            client,
            request,
            last,
        }
    }

    pub async fn check(&self) {
        let Some(client) = &self.client else {
            return;
        };

        match client.check(&self.request).await {
            Ok(info) => {
                debug!("Update check returned {} entries", info.entries.len());
                *self.last.write().unwrap_or_else(PoisonError::into_inner) = info;
            }
            Err(e) => debug!("Update check against {} failed: {}", client.url(), e),
        }
    }
}

#[async_trait]
impl Worker for UpdateChecker {
    fn name(&self) -> &'static str {
        "update-checker"
    }

    async fn run_once(&self) {
        self.check().await;
    }
}
