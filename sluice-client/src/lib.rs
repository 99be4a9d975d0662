//! Sluice HTTP Client
//!
//! HTTP plumbing used by the runner:
//! - [`HttpIpcTransport`]: ships serialized record batches to another Sluice
//!   instance listening for IPC deliveries
//! - [`UpdateClient`]: asks an update service whether newer stage libraries
//!   are available
//!
//! # Example
//!
//! ```no_run
//! use sluice_client::UpdateClient;
//! use sluice_core::dto::update::UpdateCheckRequest;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = UpdateClient::new("http://updates.example.com/check");
//!     let info = client.check(&UpdateCheckRequest {
//!         runner_id: "runner-1".to_string(),
//!         version: "0.1.0".to_string(),
//!         stage_types: vec!["dev_data".to_string()],
//!     }).await?;
//!     println!("{:?}", info);
//!     Ok(())
//! }
//! ```

pub mod error;
mod ipc;
mod update;

pub use error::{ClientError, Result};
pub use ipc::{APPLICATION_ID_HEADER, HttpIpcTransport, IPC_PATH};
pub use update::UpdateClient;

/// Reads a failed response's body for error reporting
pub(crate) async fn error_text(response: reqwest::Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string())
}
