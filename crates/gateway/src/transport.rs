//! HTTP transport abstraction.
//!
//! The gateway builds fully resolved [`HttpRequest`]s and hands them to a
//! [`Transport`]. [`ReqwestTransport`] is the production implementation;
//! tests substitute a scripted transport.

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    descriptor::Method,
    error::{TransportError, status_text_for},
};

/// A fully resolved HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute (or host-relative) URL including the query string.
    pub url: String,
    /// Headers with lower-cased names.
    pub headers: BTreeMap<String, String>,
    /// Serialized JSON body.
    pub body: Option<Bytes>,
}

impl HttpRequest {
    /// Returns the value of header `name` (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// A received HTTP response with its body fully read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Reason phrase.
    pub status_text: String,
    /// Raw body.
    pub body: Bytes,
}

impl HttpResponse {
    /// A response with a JSON body.
    #[must_use]
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self {
            status,
            status_text: status_text_for(status).to_owned(),
            body: Bytes::from(body.to_string()),
        }
    }

    /// A response with an empty body.
    #[must_use]
    pub fn empty(status: u16) -> Self {
        Self { status, status_text: status_text_for(status).to_owned(), body: Bytes::new() }
    }

    /// Returns `true` for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends HTTP requests.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends `request` and reads the full response.
    ///
    /// Non-success statuses are responses, not errors.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when no response could be obtained.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// [`Transport`] backed by a shared [`reqwest::Client`].
///
/// Responses are never served from an HTTP cache: every request carries
/// `cache-control: no-cache`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Creates a transport whose calls time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidRequest`] if the client cannot be
    /// initialized (for example, TLS setup fails).
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::InvalidRequest(format!("failed to build client: {e}")))?;
        Ok(Self { client, timeout })
    }

    /// Wraps an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn classify(&self, error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else if error.is_builder() {
            TransportError::InvalidRequest(error.to_string())
        } else {
            TransportError::Connect {
                message: error.to_string(),
                source: Some(std::sync::Arc::new(error)),
            }
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method.into(), &request.url)
            .header(reqwest::header::CACHE_CONTROL, "no-cache");
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        let body = response.bytes().await.map_err(|e| TransportError::Body {
            message: e.to_string(),
            source: Some(std::sync::Arc::new(e)),
        })?;

        Ok(HttpResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_owned(),
            body,
        })
    }
}
