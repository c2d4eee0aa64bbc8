//! HTTP transport for the Squash collector
//!
//! The delivery loop only depends on the [`Transport`] trait: post a JSON
//! body to a path and report success or a classified failure.
//! [`HttpTransport`] implements it with reqwest, blocking the caller on a
//! private current-thread runtime.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING, CONTENT_TYPE};
use thiserror::Error;

use crate::error::{Error, Result};

/// Marker added to every POST body so the server can check UTF-8 survived
pub const UTF8_MARKER_KEY: &str = "utf8";
pub const UTF8_MARKER: &str = "\u{2713}";

/// Why one transmission failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The server answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Nothing accepted the connection
    #[error("no server reachable: {0}")]
    Unreachable(String),

    /// The request did not complete within the configured timeout
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Anything else that went wrong while sending
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// True when every later transmission would fail the same way, so the
    /// rest of the batch should be left for another run.
    pub fn aborts_batch(&self) -> bool {
        match self {
            TransportError::Http { status, .. } => *status == 403,
            TransportError::Unreachable(_) => true,
            TransportError::Timeout(_) | TransportError::Other(_) => false,
        }
    }
}

/// Sends one JSON document to a path on the collector
pub trait Transport {
    fn transmit(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> std::result::Result<(), TransportError>;
}

/// Copy `body` and add the UTF-8 marker field
pub fn with_utf8_marker(body: &serde_json::Value) -> serde_json::Value {
    let mut body = body.clone();
    if let serde_json::Value::Object(map) = &mut body {
        map.insert(
            UTF8_MARKER_KEY.to_string(),
            serde_json::Value::String(UTF8_MARKER.to_string()),
        );
    }
    body
}

/// reqwest-backed transport for a Squash host
pub struct HttpTransport {
    http_client: reqwest::Client,
    runtime: tokio::runtime::Runtime,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport for `host` (scheme, host and port, e.g.
    /// `https://squash.example.com:3000`)
    pub fn new(host: &str, timeout: Option<Duration>) -> Result<Self> {
        Self::with_timeouts(host, None, timeout)
    }

    /// Like [`HttpTransport::new`], with a separate limit on establishing
    /// the connection
    pub fn with_timeouts(
        host: &str,
        connect_timeout: Option<Duration>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let base_url = host.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::Config("transport host is empty".to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("utf-8"));

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(connect_timeout) = connect_timeout {
            builder = builder.connect_timeout(connect_timeout);
        }
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Config(format!("failed to create runtime: {}", e)))?;

        Ok(Self {
            http_client,
            runtime,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> std::result::Result<(), TransportError> {
        let url = format!("{}{}", self.base_url, path);
        let body = with_utf8_marker(body);

        let response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown".to_string());

        if status.is_success() {
            tracing::info!(status = status.as_u16(), response = %text, "Response received");
            Ok(())
        } else {
            Err(TransportError::Http {
                status: status.as_u16(),
                body: text,
            })
        }
    }
}

impl Transport for HttpTransport {
    fn transmit(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> std::result::Result<(), TransportError> {
        self.runtime.block_on(self.post(path, body))
    }
}

fn classify_request_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(error.to_string())
    } else if error.is_connect() {
        TransportError::Unreachable(error.to_string())
    } else {
        TransportError::Other(format!("HTTP request failed: {}", error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_requires_host() {
        assert!(HttpTransport::new("", None).is_err());
    }

    #[test]
    fn test_transport_trims_trailing_slash() {
        let transport =
            HttpTransport::new("https://squash.example.com/", Some(Duration::from_secs(15)))
                .unwrap();
        assert_eq!(transport.base_url(), "https://squash.example.com");
    }

    #[test]
    fn test_aborting_errors() {
        assert!(TransportError::Http {
            status: 403,
            body: String::new()
        }
        .aborts_batch());
        assert!(TransportError::Unreachable("refused".to_string()).aborts_batch());
        assert!(!TransportError::Http {
            status: 422,
            body: String::new()
        }
        .aborts_batch());
        assert!(!TransportError::Http {
            status: 500,
            body: String::new()
        }
        .aborts_batch());
        assert!(!TransportError::Timeout("15s".to_string()).aborts_batch());
        assert!(!TransportError::Other("tls".to_string()).aborts_batch());
    }

    #[test]
    fn test_utf8_marker_added() {
        let body = with_utf8_marker(&serde_json::json!({"UUID": "x"}));
        assert_eq!(body["utf8"], "\u{2713}");
        assert_eq!(body["UUID"], "x");
    }

    #[test]
    fn test_refused_connection_is_unreachable() {
        // Port 9 on loopback: nothing listens there in a test environment.
        let transport =
            HttpTransport::new("http://127.0.0.1:9", Some(Duration::from_secs(5))).unwrap();
        let err = transport
            .transmit("/api/1.0/notify", &serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(err, TransportError::Unreachable(_)), "{err:?}");
    }
}
