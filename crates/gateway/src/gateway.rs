//! The authenticated request gateway.
//!
//! [`Gateway::request`] is the single path from callers to the network:
//!
//! 1. Decide whether the route is public (descriptor flag or configured
//!    route fragment).
//! 2. Short-circuit private routes without a session as
//!    [`Unauthenticated`](ApiErrorKind::Unauthenticated); nothing is sent.
//! 3. Fold the call into any identical in-flight call via the
//!    [`Deduplicator`].
//! 4. Build headers (JSON content type, bearer credential when a session
//!    exists), resolve the URL, and send through the [`Transport`] under the
//!    configured timeout.
//! 5. Classify the outcome into a value or an [`ApiError`]. A 401 on a
//!    private route clears the session; a 429 is logged and counted.

use std::sync::Arc;

use bytes::Bytes;
use dashboard_client_session::SessionStore;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    config::GatewayConfig,
    dedup::Deduplicator,
    descriptor::RequestDescriptor,
    error::{ApiError, ApiErrorKind, TransportError},
    metrics::{GatewayMetrics, GatewayMetricsSnapshot},
    transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport},
};

const JSON: &str = "application/json";

/// A successful response, shared between deduplicated callers.
#[derive(Debug, Clone)]
struct Settled {
    status: u16,
    body: Value,
    /// The server sent no body; `body` is the `{}` stand-in.
    empty: bool,
}

type Outcome = Result<Settled, ApiError>;

struct Inner {
    config: GatewayConfig,
    base_url: String,
    session: SessionStore,
    transport: Arc<dyn Transport>,
    inflight: Deduplicator<Outcome>,
    metrics: GatewayMetrics,
}

/// Authenticated, deduplicating HTTP gateway.
///
/// Cheaply cloneable; clones share the in-flight registry and metrics.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("base_url", &self.inner.base_url)
            .field("in_flight", &self.inner.inflight.in_flight())
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Creates a gateway sending through `transport`.
    ///
    /// The base URL is resolved once, here.
    pub fn new(
        config: GatewayConfig,
        session: SessionStore,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let base_url = config.base_url();
        tracing::debug!(base_url = %base_url, "gateway target resolved");
        Self {
            inner: Arc::new(Inner {
                config,
                base_url,
                session,
                transport,
                inflight: Deduplicator::new(),
                metrics: GatewayMetrics::new(),
            }),
        }
    }

    /// Creates a gateway over a [`ReqwestTransport`] using the configured
    /// timeout.
    ///
    /// # Errors
    ///
    /// Returns a [`Network`](ApiErrorKind::Network) error if the HTTP
    /// client cannot be initialized or the configuration names no absolute
    /// backend URL.
    pub fn with_reqwest(config: GatewayConfig, session: SessionStore) -> Result<Self, ApiError> {
        config.absolute_base_url().map_err(ApiError::network)?;
        let transport = ReqwestTransport::new(config.request_timeout()).map_err(ApiError::network)?;
        Ok(Self::new(config, session, Arc::new(transport)))
    }

    /// Sends `descriptor` and decodes the JSON response into `T`.
    ///
    /// An empty success body decodes as `{}`, or as `null` when `T` does not
    /// accept an object, so `request::<()>` and `Option<T>` work for
    /// no-content endpoints.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] for every failure; see [`ApiErrorKind`].
    pub async fn request<T: DeserializeOwned>(
        &self,
        descriptor: &RequestDescriptor,
    ) -> Result<T, ApiError> {
        let Settled { status, body, empty } = self.dispatch(descriptor).await?;
        let decoded = match serde_json::from_value(body) {
            Err(_) if empty => serde_json::from_value(Value::Null),
            decoded => decoded,
        };
        decoded.map_err(|e| {
            tracing::warn!(
                path = descriptor.path(),
                error = %e,
                "response body has unexpected shape"
            );
            ApiError::invalid_response(status, format!("Unexpected response body: {e}"))
                .with_source(e)
        })
    }

    /// Sends `descriptor` and returns the raw JSON response.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] for every failure; see [`ApiErrorKind`].
    pub async fn request_value(&self, descriptor: &RequestDescriptor) -> Result<Value, ApiError> {
        self.dispatch(descriptor).await.map(|settled| settled.body)
    }

    #[tracing::instrument(
        name = "gateway.request",
        skip(self, descriptor),
        fields(method = %descriptor.method(), path = descriptor.path())
    )]
    async fn dispatch(&self, descriptor: &RequestDescriptor) -> Outcome {
        self.inner.metrics.record_request();

        let public = descriptor.is_public() || self.inner.config.is_public_route(descriptor.path());
        let token = self.inner.session.token();
        if !public && token.is_none() {
            tracing::debug!("no session for private route; request not sent");
            return Err(ApiError::unauthenticated());
        }

        let request = self.build_request(descriptor, token.as_deref());
        let inner = Arc::clone(&self.inner);
        self.inner
            .inflight
            .dedupe(descriptor.canonical_key(), move || {
                async move { inner.execute(request, public).await }.boxed()
            })
            .await
    }

    fn build_request(&self, descriptor: &RequestDescriptor, token: Option<&str>) -> HttpRequest {
        let mut headers = descriptor.headers().clone();
        headers.insert("content-type".into(), JSON.into());
        headers.insert("accept".into(), JSON.into());
        if let Some(token) = token {
            headers.insert("authorization".into(), format!("Bearer {token}"));
        }

        let mut url =
            format!("{}{}", self.inner.base_url, self.inner.config.resolve_path(descriptor.path()));
        let query = descriptor.query_string();
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }

        HttpRequest {
            method: descriptor.method(),
            url,
            headers,
            body: descriptor.body().map(|body| Bytes::from(body.to_string())),
        }
    }

    /// The session store this gateway authenticates with.
    #[must_use]
    pub fn session(&self) -> &SessionStore {
        &self.inner.session
    }

    /// The configuration this gateway was created with.
    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    /// Resolved base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Number of distinct calls currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.inflight.in_flight()
    }

    /// Current counters.
    #[must_use]
    pub fn metrics(&self) -> GatewayMetricsSnapshot {
        self.inner.metrics.snapshot(self.inner.inflight.joined_count())
    }
}

impl Inner {
    async fn execute(&self, request: HttpRequest, public: bool) -> Outcome {
        self.metrics.record_network_call();
        let timeout = self.config.request_timeout();
        let sent = match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Ok(sent) => sent,
            Err(_) => Err(TransportError::Timeout(timeout)),
        };

        match sent {
            Ok(response) => self.classify(response, public),
            Err(err) => {
                self.metrics.record_network_error();
                tracing::warn!(error = %err, "request failed without a response");
                Err(ApiError::network(err))
            },
        }
    }

    fn classify(&self, response: HttpResponse, public: bool) -> Outcome {
        let status = response.status;
        if !response.is_success() {
            let body = serde_json::from_slice::<Value>(&response.body).ok();
            let err = ApiError::http(status, response.status_text, body);
            return Err(match status {
                401 if !public => {
                    self.metrics.record_session_expired();
                    self.session.handle_unauthorized();
                    tracing::info!(status, "credential rejected; session cleared");
                    err.with_kind(ApiErrorKind::SessionExpired)
                },
                429 => {
                    self.metrics.record_rate_limited();
                    tracing::warn!(status, "rate limit exceeded; backing off");
                    err
                },
                _ => {
                    self.metrics.record_http_error();
                    tracing::debug!(status, message = err.message(), "request rejected");
                    err
                },
            });
        }

        if status == 204 || response.body.iter().all(u8::is_ascii_whitespace) {
            let body = Value::Object(serde_json::Map::new());
            return Ok(Settled { status, body, empty: true });
        }

        match serde_json::from_slice(&response.body) {
            Ok(body) => Ok(Settled { status, body, empty: false }),
            Err(e) => {
                tracing::warn!(status, error = %e, "response body is not JSON");
                Err(ApiError::invalid_response(status, "Response body is not valid JSON")
                    .with_source(e))
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use dashboard_client_session::{
        MemoryTokenStorage, SessionConfig,
        testutil::{encode_test_token, test_claims},
    };
    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::{descriptor::Method, testutil::MockTransport};

    fn signed_in() -> (SessionStore, String) {
        let session =
            SessionStore::new(Arc::new(MemoryTokenStorage::new()), SessionConfig::default());
        let token = encode_test_token(&test_claims());
        session.set_token(Some(&token)).unwrap();
        (session, token)
    }

    fn gateway(session: SessionStore, transport: &Arc<MockTransport>) -> Gateway {
        let config = GatewayConfig::builder().api_url("https://api.example.com").build().unwrap();
        Gateway::new(config, session, Arc::clone(transport) as Arc<dyn Transport>)
    }

    #[tokio::test]
    async fn test_builds_authenticated_request() {
        let (session, token) = signed_in();
        let transport = Arc::new(MockTransport::new());
        transport.push_json(200, json!({"items": []}));
        let gateway = gateway(session, &transport);

        let request = RequestDescriptor::post("/lists")
            .param("page", 1)
            .json(json!({"name": "VIP"}))
            .header("Content-Type", "text/plain")
            .header("X-Request-Source", "dashboard");
        let value = gateway.request_value(&request).await.unwrap();

        assert_eq!(value, json!({"items": []}));
        let sent = transport.last_request().unwrap();
        assert_eq!(sent.method, Method::Post);
        assert_eq!(sent.url, "https://api.example.com/api/lists?page=1");
        assert_eq!(sent.header("content-type"), Some(JSON));
        assert_eq!(sent.header("accept"), Some(JSON));
        assert_eq!(sent.header("authorization"), Some(format!("Bearer {token}").as_str()));
        assert_eq!(sent.header("x-request-source"), Some("dashboard"));
        assert_eq!(&sent.body.unwrap()[..], br#"{"name":"VIP"}"#);
    }

    #[tokio::test]
    async fn test_public_route_without_session_is_sent_without_credential() {
        let session =
            SessionStore::new(Arc::new(MemoryTokenStorage::new()), SessionConfig::default());
        let transport = Arc::new(MockTransport::new());
        transport.push_json(200, json!({"status": "ok"}));
        let gateway = gateway(session, &transport);

        gateway.request_value(&RequestDescriptor::get("/health-check")).await.unwrap();

        let sent = transport.last_request().unwrap();
        assert_eq!(sent.header("authorization"), None);
    }

    #[tokio::test]
    async fn test_no_content_resolves_to_empty_object() {
        let (session, _) = signed_in();
        let transport = Arc::new(MockTransport::new());
        transport.push_response(HttpResponse::empty(204));
        let gateway = gateway(session, &transport);

        let value = gateway.request_value(&RequestDescriptor::delete("/contacts/1")).await.unwrap();
        assert_eq!(value, json!({}));
    }

    #[tokio::test]
    async fn test_no_content_decodes_into_unit_and_option() {
        #[derive(Debug, Deserialize)]
        struct Receipt {
            #[allow(dead_code)]
            id: u64,
        }

        let (session, _) = signed_in();
        let transport = Arc::new(MockTransport::new());
        transport.push_response(HttpResponse::empty(204));
        transport.push_response(HttpResponse::empty(200));
        transport.push_response(HttpResponse::empty(204));
        let gateway = gateway(session, &transport);

        gateway.request::<()>(&RequestDescriptor::delete("/contacts/1")).await.unwrap();
        let receipt = gateway
            .request::<Option<Receipt>>(&RequestDescriptor::post("/contacts/1/archive"))
            .await
            .unwrap();
        assert!(receipt.is_none());
        let map = gateway
            .request::<serde_json::Map<String, Value>>(&RequestDescriptor::delete("/lists/1"))
            .await
            .unwrap();
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn test_unit_rejects_a_non_empty_body() {
        let (session, _) = signed_in();
        let transport = Arc::new(MockTransport::new());
        transport.push_json(200, json!({"id": 1}));
        let gateway = gateway(session, &transport);

        let err =
            gateway.request::<()>(&RequestDescriptor::delete("/contacts/1")).await.unwrap_err();
        assert_eq!(err.kind(), ApiErrorKind::InvalidResponse);
    }

    #[test]
    fn test_reqwest_gateway_requires_absolute_base_url() {
        let session =
            SessionStore::new(Arc::new(MemoryTokenStorage::new()), SessionConfig::default());

        let err = Gateway::with_reqwest(GatewayConfig::default(), session.clone()).unwrap_err();
        assert!(err.is_network());

        let config = GatewayConfig::builder().origin("https://app.example.com").build().unwrap();
        let gateway = Gateway::with_reqwest(config, session).unwrap();
        assert_eq!(gateway.base_url(), "https://app.example.com");
    }

    #[tokio::test]
    async fn test_typed_decode_failure_is_invalid_response() {
        #[derive(Debug, Deserialize)]
        struct Contact {
            #[allow(dead_code)]
            id: u64,
        }

        let (session, _) = signed_in();
        let transport = Arc::new(MockTransport::new());
        transport.push_json(200, json!({"id": "not-a-number"}));
        let gateway = gateway(session, &transport);

        let err =
            gateway.request::<Contact>(&RequestDescriptor::get("/contacts/1")).await.unwrap_err();
        assert_eq!(err.kind(), ApiErrorKind::InvalidResponse);
        assert_eq!(err.status_code(), 200);
    }

    #[tokio::test]
    async fn test_non_json_success_body_is_invalid_response() {
        let (session, _) = signed_in();
        let transport = Arc::new(MockTransport::new());
        transport.push_response(HttpResponse {
            status: 200,
            status_text: "OK".into(),
            body: Bytes::from_static(b"<html>"),
        });
        let gateway = gateway(session, &transport);

        let err = gateway.request_value(&RequestDescriptor::get("/contacts")).await.unwrap_err();
        assert_eq!(err.kind(), ApiErrorKind::InvalidResponse);
    }

    #[tokio::test]
    async fn test_http_error_carries_server_message() {
        let (session, _) = signed_in();
        let transport = Arc::new(MockTransport::new());
        transport.push_json(422, json!({"detail": "Invalid phone number"}));
        let gateway = gateway(session.clone(), &transport);

        let err = gateway.request_value(&RequestDescriptor::post("/contacts")).await.unwrap_err();

        assert_eq!(err.kind(), ApiErrorKind::Http);
        assert_eq!(err.status_code(), 422);
        assert_eq!(err.message(), "Invalid phone number");
        assert!(session.state().is_authenticated());
        assert_eq!(gateway.metrics().http_errors, 1);
    }

    #[tokio::test]
    async fn test_401_on_public_route_keeps_session() {
        let (session, _) = signed_in();
        let transport = Arc::new(MockTransport::new());
        transport.push_json(401, json!({"message": "Invalid credentials"}));
        let gateway = gateway(session.clone(), &transport);

        let err = gateway
            .request_value(&RequestDescriptor::post("/api/auth/login"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ApiErrorKind::Http);
        assert_eq!(err.message(), "Invalid credentials");
        assert!(session.state().is_authenticated());
    }

    #[tokio::test]
    async fn test_transport_error_is_network_error() {
        let (session, _) = signed_in();
        let transport = Arc::new(MockTransport::new());
        transport.push_error(TransportError::connect("connection refused"));
        let gateway = gateway(session, &transport);

        let err = gateway.request_value(&RequestDescriptor::get("/contacts")).await.unwrap_err();

        assert_eq!(err.kind(), ApiErrorKind::Network);
        assert_eq!(err.status_code(), 0);
        assert_eq!(err.status_text(), "Network Error");
        assert_eq!(gateway.metrics().network_errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_network_error() {
        let (session, _) = signed_in();
        let transport = Arc::new(MockTransport::gated());
        transport.push_json(200, json!({}));
        let gateway = gateway(session, &transport);

        let err = gateway.request_value(&RequestDescriptor::get("/contacts")).await.unwrap_err();

        assert!(err.is_network());
        assert!(err.to_string().contains("Unable to connect"));
        assert_eq!(gateway.in_flight(), 0);
        assert_eq!(transport.calls(), 1);
    }
}
