//! Update check client

use reqwest::Client;
use sluice_core::dto::update::{UpdateCheckRequest, UpdateInfo};

use crate::error::{ClientError, Result};

/// HTTP client for the update check service
#[derive(Debug, Clone)]
pub struct UpdateClient {
    /// Full URL of the check endpoint
    url: String,
    client: Client,
}

impl UpdateClient {
    /// Create a new update client
    ///
    /// # Arguments
    /// * `url` - The update check endpoint (e.g., "https://updates.example.com/check")
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(url, Client::new())
    }

    /// Create a new update client with a custom HTTP client
    pub fn with_client(url: impl Into<String>, client: Client) -> Self {
        let url = url.into();
        Self {
            url: url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the endpoint URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Reports this runner's version and stage types, returning whatever
    /// update information the service has
    ///
    /// An empty response body means no updates are available.
    pub async fn check(&self, request: &UpdateCheckRequest) -> Result<UpdateInfo> {
        let response = self.client.post(&self.url).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = crate::error_text(response).await;
            return Err(ClientError::api_error(status.as_u16(), text));
        }

        let body = response.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(UpdateInfo::default());
        }
        serde_json::from_slice(&body)
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }
}
