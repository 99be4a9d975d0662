//! HTTP IPC transport
//!
//! Delivers a chunk of serialized records to a Sluice IPC endpoint as a single
//! JSON array POST. The endpoint answers for the request as a whole: HTTP 200
//! means every record was accepted.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use sluice_core::transport::{DeliveryTransport, SubmitOutcome, TransportError};

/// Path IPC endpoints listen on
pub const IPC_PATH: &str = "/ipc/v1";
/// Header carrying the application id the receiver authenticates against
pub const APPLICATION_ID_HEADER: &str = "X-Sluice-Application-Id";

/// [`DeliveryTransport`] posting record chunks to `host:port` endpoints
#[derive(Debug, Clone)]
pub struct HttpIpcTransport {
    client: Client,
    app_id: String,
}

impl HttpIpcTransport {
    /// Creates a transport identifying itself with `app_id`
    pub fn new(app_id: impl Into<String>) -> Self {
        Self::with_client(app_id, Client::new())
    }

    /// Create a transport with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(app_id: impl Into<String>, client: Client) -> Self {
        Self {
            client,
            app_id: app_id.into(),
        }
    }

    /// Builds the request URL for an endpoint given as `host:port` or as a full URL
    pub fn url_for(endpoint: &str) -> String {
        let base = endpoint.trim_end_matches('/');
        if base.starts_with("http://") || base.starts_with("https://") {
            format!("{}{}", base, IPC_PATH)
        } else {
            format!("http://{}{}", base, IPC_PATH)
        }
    }

    /// Joins already serialized JSON records into a JSON array body
    fn array_body(entries: &[Vec<u8>]) -> Vec<u8> {
        let size = entries.iter().map(Vec::len).sum::<usize>() + entries.len() + 2;
        let mut body = Vec::with_capacity(size);
        body.push(b'[');
        for (i, entry) in entries.iter().enumerate() {
            if i > 0 {
                body.push(b',');
            }
            body.extend_from_slice(entry);
        }
        body.push(b']');
        body
    }
}

#[async_trait]
impl DeliveryTransport for HttpIpcTransport {
    async fn submit_batch(
        &self,
        endpoint: &str,
        entries: &[Vec<u8>],
    ) -> Result<SubmitOutcome, TransportError> {
        let url = Self::url_for(endpoint);
        tracing::debug!("Posting {} record(s) to {}", entries.len(), url);

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .header(APPLICATION_ID_HEADER, &self.app_id)
            .body(Self::array_body(entries))
            .send()
            .await
            .map_err(|e| TransportError::new(endpoint, e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::OK {
            return Ok(SubmitOutcome::batch_ok());
        }

        let text = crate::error_text(response).await;
        Ok(SubmitOutcome::batch_failed(format!(
            "status {}: {}",
            status.as_u16(),
            text
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accepts one request, answers with `status` and hands back the request body
    async fn serve_once(status: &'static str) -> (String, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];

            let header_end = loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let headers = String::from_utf8_lossy(&request[..header_end]).to_lowercase();
            let length: usize = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .map(|v| v.trim().parse().unwrap())
                .unwrap_or(0);
            while request.len() < header_end + length {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
            }

            let reply = format!("HTTP/1.1 {}\r\ncontent-length: 4\r\nconnection: close\r\n\r\nnope", status);
            socket.write_all(reply.as_bytes()).await.unwrap();
            request[header_end..].to_vec()
        });

        (addr, handle)
    }

    fn entries() -> Vec<Vec<u8>> {
        vec![br#"{"id":1}"#.to_vec(), br#"{"id":2}"#.to_vec()]
    }

    #[test]
    fn test_url_for() {
        assert_eq!(HttpIpcTransport::url_for("host:9000"), "http://host:9000/ipc/v1");
        assert_eq!(
            HttpIpcTransport::url_for("https://host:9000/"),
            "https://host:9000/ipc/v1"
        );
    }

    #[test]
    fn test_array_body() {
        let body = HttpIpcTransport::array_body(&entries());
        assert_eq!(body, br#"[{"id":1},{"id":2}]"#.to_vec());
        assert_eq!(HttpIpcTransport::array_body(&[]), b"[]".to_vec());
    }

    #[tokio::test]
    async fn test_status_200_delivers_batch() {
        let (addr, server) = serve_once("200 OK").await;
        let transport = HttpIpcTransport::new("app");

        let outcome = transport.submit_batch(&addr, &entries()).await.unwrap();

        assert_eq!(outcome, SubmitOutcome::batch_ok());
        let body = server.await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed, serde_json::json!([{ "id": 1 }, { "id": 2 }]));
    }

    #[tokio::test]
    async fn test_other_status_fails_batch() {
        let (addr, server) = serve_once("500 Internal Server Error").await;
        let transport = HttpIpcTransport::new("app");

        let outcome = transport.submit_batch(&addr, &entries()).await.unwrap();

        match outcome {
            SubmitOutcome::Batch { success, error_detail } => {
                assert!(!success);
                assert!(error_detail.unwrap().starts_with("status 500"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let transport = HttpIpcTransport::new("app");
        let err = transport.submit_batch(&addr, &entries()).await.unwrap_err();
        assert_eq!(err.endpoint, addr);
    }
}
