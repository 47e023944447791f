//! HTTP client module for pushing encoded batches to Loki.
//!
//! One POST per batch: the body is JSON, gzip-compressed once it reaches
//! [`MIN_GZIP_SIZE`] bytes, with basic auth attached when credentials are
//! configured. Only `204 No Content` counts as success. There is no retry;
//! the caller decides what to do with a failed batch.

use std::io::Write;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::debug;

use crate::config::Config;
use crate::encoder::PushRequest;

/// Timeout for the whole request/response cycle.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Serialized bodies at or above this size are gzip-compressed.
pub const MIN_GZIP_SIZE: usize = 3 * 1024;

/// Errors that can occur while pushing a batch.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Payload could not be serialized
    #[error("Failed to encode push request: {0}")]
    Encode(#[from] serde_json::Error),

    /// Payload could not be gzip-compressed
    #[error("Failed to compress push request: {0}")]
    Compress(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Request(#[source] reqwest::Error),

    /// Request timeout
    #[error("Request timed out")]
    Timeout,

    /// Loki answered with something other than 204
    #[error("Unexpected response from Loki ({code}): {message}")]
    Status { code: StatusCode, message: String },

    /// Client configuration error
    #[error("Client configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Request(err)
        }
    }
}

/// A request body ready to go on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Body {
    pub bytes: Vec<u8>,
    pub gzipped: bool,
}

/// Gzip `json` if it reaches [`MIN_GZIP_SIZE`], otherwise pass it through.
pub fn compress_body(json: Vec<u8>) -> Result<Body, ClientError> {
    if json.len() < MIN_GZIP_SIZE {
        return Ok(Body {
            bytes: json,
            gzipped: false,
        });
    }

    let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 4), Compression::default());
    encoder.write_all(&json)?;
    let bytes = encoder.finish()?;

    Ok(Body {
        bytes,
        gzipped: true,
    })
}

/// HTTP client for the Loki push API.
///
/// The underlying `reqwest::Client` is built once and reused, so connections
/// are pooled across batches.
pub struct LokiClient {
    client: Client,
    push_url: String,
    credentials: Option<(String, String)>,
}

impl LokiClient {
    /// Create a new client for the endpoint and credentials in `config`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        Ok(Self {
            client,
            push_url: config.push_url(),
            credentials: config
                .credentials()
                .map(|(user, pass)| (user.to_string(), pass.to_string())),
        })
    }

    /// Push one encoded batch.
    ///
    /// Makes exactly one attempt. Any status other than `204 No Content`, and
    /// any connection or timeout error, is returned as a failure.
    pub async fn send(&self, request: &PushRequest<'_>) -> Result<(), ClientError> {
        let json = serde_json::to_vec(request)?;
        let json_len = json.len();
        let body = compress_body(json)?;

        debug!(
            lines = request.line_count(),
            json_bytes = json_len,
            body_bytes = body.bytes.len(),
            gzipped = body.gzipped,
            url = %self.push_url,
            "Pushing log batch"
        );

        let mut builder = self
            .client
            .post(&self.push_url)
            .header(CONTENT_TYPE, "application/json");
        if body.gzipped {
            builder = builder.header(CONTENT_ENCODING, "gzip");
        }
        if let Some((user, pass)) = &self.credentials {
            builder = builder.basic_auth(user, Some(pass));
        }

        let response = builder.body(body.bytes).send().await?;
        let status = response.status();

        if status == StatusCode::NO_CONTENT {
            return Ok(());
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        Err(ClientError::Status {
            code: status,
            message: message.trim().to_string(),
        })
    }

    /// Get the push URL requests are sent to.
    pub fn push_url(&self) -> &str {
        &self.push_url
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::encode;
    use crate::record::{Batch, Labels, Record};
    use chrono::{TimeZone, Utc};
    use flate2::read::GzDecoder;
    use mockito::{Matcher, Server};
    use std::io::Read;

    fn config_for(url: String) -> Config {
        Config {
            endpoint: url,
            ..Config::default()
        }
    }

    fn create_test_batch(size: usize, message_len: usize) -> Batch {
        let records = (0..size)
            .map(|i| {
                Record::at(
                    Utc.timestamp_opt(1_700_000_000 + i as i64, 0).unwrap(),
                    "info",
                    "x".repeat(message_len),
                )
            })
            .collect();
        Batch::new(records)
    }

    #[test]
    fn test_client_error_display() {
        let err = ClientError::Timeout;
        assert_eq!(format!("{}", err), "Request timed out");

        let err = ClientError::Status {
            code: StatusCode::BAD_REQUEST,
            message: "entry out of order".to_string(),
        };
        assert!(format!("{}", err).contains("400"));
        assert!(format!("{}", err).contains("entry out of order"));
    }

    #[test]
    fn test_client_creation() {
        let config = Config {
            endpoint: "http://loki:3100/".to_string(),
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
            ..Config::default()
        };
        let client = LokiClient::new(&config).unwrap();

        assert_eq!(client.push_url(), "http://loki:3100/loki/api/v1/push");
        assert!(client.has_credentials());

        let client = LokiClient::new(&Config::default()).unwrap();
        assert!(!client.has_credentials());
    }

    #[test]
    fn test_small_body_is_not_compressed() {
        let json = vec![b'a'; MIN_GZIP_SIZE - 1];
        let body = compress_body(json.clone()).unwrap();

        assert!(!body.gzipped);
        assert_eq!(body.bytes, json);
    }

    #[test]
    fn test_large_body_is_gzipped_and_round_trips() {
        let batch = create_test_batch(40, 100);
        let labels = Labels::new();
        let json = serde_json::to_vec(&encode(&batch, &labels)).unwrap();
        assert!(json.len() >= MIN_GZIP_SIZE);

        let body = compress_body(json.clone()).unwrap();
        assert!(body.gzipped);
        assert!(body.bytes.len() < json.len());

        let mut decompressed = Vec::new();
        GzDecoder::new(body.bytes.as_slice())
            .read_to_end(&mut decompressed)
            .unwrap();
        assert_eq!(decompressed, json);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let body = compress_body(vec![b'{'; MIN_GZIP_SIZE]).unwrap();
        assert!(body.gzipped);
    }

    #[tokio::test]
    async fn test_send_small_batch() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/loki/api/v1/push")
            .match_header("content-type", "application/json")
            .match_header("content-encoding", Matcher::Missing)
            .match_header("authorization", Matcher::Missing)
            .match_body(Matcher::Json(serde_json::json!({
                "streams": [{
                    "stream": {"app": "api"},
                    "values": [["1700000000000000000", "hello"]]
                }]
            })))
            .with_status(204)
            .create_async()
            .await;

        let client = LokiClient::new(&config_for(server.url())).unwrap();
        let batch = Batch::new(vec![Record::at(
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            "info",
            "hello",
        )]);
        let mut labels = Labels::new();
        labels.insert("app".to_string(), "api".to_string());

        client.send(&encode(&batch, &labels)).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_large_batch_gzipped() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/loki/api/v1/push")
            .match_header("content-type", "application/json")
            .match_header("content-encoding", "gzip")
            .with_status(204)
            .create_async()
            .await;

        let client = LokiClient::new(&config_for(server.url())).unwrap();
        let batch = create_test_batch(50, 100);
        let labels = Labels::new();

        client.send(&encode(&batch, &labels)).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_with_basic_auth() {
        let mut server = Server::new_async().await;
        // base64("user:pass")
        let mock = server
            .mock("POST", "/loki/api/v1/push")
            .match_header("authorization", "Basic dXNlcjpwYXNz")
            .with_status(204)
            .create_async()
            .await;

        let config = Config {
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
            ..config_for(server.url())
        };
        let client = LokiClient::new(&config).unwrap();
        let batch = create_test_batch(1, 10);
        let labels = Labels::new();

        client.send(&encode(&batch, &labels)).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_without_password_skips_auth() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/loki/api/v1/push")
            .match_header("authorization", Matcher::Missing)
            .with_status(204)
            .create_async()
            .await;

        let config = Config {
            username: Some("user".to_string()),
            password: None,
            ..config_for(server.url())
        };
        let client = LokiClient::new(&config).unwrap();
        let batch = create_test_batch(1, 10);
        let labels = Labels::new();

        client.send(&encode(&batch, &labels)).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_trailing_slash_endpoint() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/loki/api/v1/push")
            .with_status(204)
            .create_async()
            .await;

        let client = LokiClient::new(&config_for(format!("{}/", server.url()))).unwrap();
        let batch = create_test_batch(1, 10);
        let labels = Labels::new();

        client.send(&encode(&batch, &labels)).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_204_is_failure() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/loki/api/v1/push")
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let client = LokiClient::new(&config_for(server.url())).unwrap();
        let batch = create_test_batch(1, 10);
        let labels = Labels::new();

        let err = client.send(&encode(&batch, &labels)).await.unwrap_err();
        match err {
            ClientError::Status { code, message } => {
                assert_eq!(code, StatusCode::OK);
                assert_eq!(message, "ok");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_server_error_is_failure() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/loki/api/v1/push")
            .with_status(500)
            .with_body("Internal Server Error")
            .create_async()
            .await;

        let client = LokiClient::new(&config_for(server.url())).unwrap();
        let batch = create_test_batch(1, 10);
        let labels = Labels::new();

        let err = client.send(&encode(&batch, &labels)).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Status { code, .. } if code == StatusCode::INTERNAL_SERVER_ERROR
        ));
    }

    #[tokio::test]
    async fn test_connection_refused_is_failure() {
        // Port 1 is reserved and never has a listener in test environments
        let client = LokiClient::new(&config_for("http://127.0.0.1:1".to_string())).unwrap();
        let batch = create_test_batch(1, 10);
        let labels = Labels::new();

        let err = client.send(&encode(&batch, &labels)).await.unwrap_err();
        assert!(matches!(err, ClientError::Request(_)));
    }
}
