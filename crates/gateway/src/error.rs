//! Gateway error types.
//!
//! Every failure a caller can observe from the gateway is an [`ApiError`]:
//! a normalized record with a [`kind`](ApiError::kind), an HTTP-style status
//! code (`0` for failures where no response was obtained), the status text,
//! a human-readable message, and the parsed error body when the server sent
//! one. Raw transport failures are classified into this shape at the gateway
//! boundary and never escape it.
//!
//! # Error Taxonomy
//!
//! | Kind | Status | Origin |
//! |------|--------|--------|
//! | [`Unauthenticated`](ApiErrorKind::Unauthenticated) | 401 | No session; no request sent |
//! | [`Unauthenticated`](ApiErrorKind::Unauthenticated) | 2xx | Issued token could not be stored |
//! | [`SessionExpired`](ApiErrorKind::SessionExpired) | 401 | Server rejected the credential |
//! | [`RateLimited`](ApiErrorKind::RateLimited) | 429 | Server throttled the client |
//! | [`Http`](ApiErrorKind::Http) | 4xx/5xx | Any other non-success status |
//! | [`Network`](ApiErrorKind::Network) | 0 | No response obtained |
//! | [`InvalidToken`](ApiErrorKind::InvalidToken) | 2xx | Server issued an undecodable token |
//! | [`InvalidResponse`](ApiErrorKind::InvalidResponse) | 2xx | Body did not match the expected shape |

use std::{fmt, sync::Arc, time::Duration};

use dashboard_client_session::TokenError;
use serde_json::Value;
use thiserror::Error;

pub use dashboard_client_session::{BoxError, ConfigError};

/// Status code used for failures where no HTTP response was obtained.
pub const NETWORK_ERROR_STATUS: u16 = 0;

/// Fallback message when the error body carries none.
pub const DEFAULT_ERROR_MESSAGE: &str = "An error occurred";

/// Classification of an [`ApiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ApiErrorKind {
    /// A private route was requested without a session.
    Unauthenticated,
    /// The server answered 401 on a private route; the session was cleared.
    SessionExpired,
    /// The server answered 429.
    RateLimited,
    /// Any other non-success HTTP status.
    Http,
    /// The request failed before a response was obtained.
    Network,
    /// The server issued a token the client could not decode.
    InvalidToken,
    /// A success response whose body could not be decoded.
    InvalidResponse,
}

impl ApiErrorKind {
    /// Short stable name, used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::SessionExpired => "session_expired",
            Self::RateLimited => "rate_limited",
            Self::Http => "http",
            Self::Network => "network",
            Self::InvalidToken => "invalid_token",
            Self::InvalidResponse => "invalid_response",
        }
    }
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized failure returned by every gateway call.
///
/// Cheap to clone: concurrent callers that joined one deduplicated request
/// each receive a copy of the same error.
#[derive(Debug, Clone, Error)]
#[error("{message} (status {status_code} {status_text})")]
pub struct ApiError {
    kind: ApiErrorKind,
    status_code: u16,
    status_text: String,
    message: String,
    body: Option<Value>,
    #[source]
    source: Option<BoxError>,
}

impl ApiError {
    fn new(
        kind: ApiErrorKind,
        status_code: u16,
        status_text: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            status_code,
            status_text: status_text.into(),
            message: message.into(),
            body: None,
            source: None,
        }
    }

    /// A private route was requested without a session.
    #[must_use]
    pub fn unauthenticated() -> Self {
        Self::new(ApiErrorKind::Unauthenticated, 401, "Unauthorized", "Authentication required")
    }

    /// Classifies a non-success HTTP response.
    ///
    /// The message is taken from the body's `message` field, then `detail`,
    /// falling back to [`DEFAULT_ERROR_MESSAGE`]. A 429 is
    /// [`RateLimited`](ApiErrorKind::RateLimited); everything else is
    /// [`Http`](ApiErrorKind::Http). The gateway upgrades a 401 on a private
    /// route to [`SessionExpired`](ApiErrorKind::SessionExpired).
    #[must_use]
    pub fn http(status_code: u16, status_text: impl Into<String>, body: Option<Value>) -> Self {
        let kind = if status_code == 429 { ApiErrorKind::RateLimited } else { ApiErrorKind::Http };
        let message = body
            .as_ref()
            .and_then(|b| message_field(b, "message").or_else(|| message_field(b, "detail")))
            .unwrap_or(DEFAULT_ERROR_MESSAGE)
            .to_owned();
        Self { body, ..Self::new(kind, status_code, status_text, message) }
    }

    /// No response was obtained.
    #[must_use]
    pub fn network(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::new(
            ApiErrorKind::Network,
            NETWORK_ERROR_STATUS,
            "Network Error",
            "Unable to connect to the server",
        )
        .with_source(source)
    }

    /// A read that was not sent because the client is offline.
    #[must_use]
    pub fn offline() -> Self {
        Self::new(ApiErrorKind::Network, NETWORK_ERROR_STATUS, "Network Error", "Client is offline")
    }

    /// A success response whose body could not be decoded.
    #[must_use]
    pub fn invalid_response(status_code: u16, message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::InvalidResponse, status_code, status_text_for(status_code), message)
    }

    /// The server issued a token that failed to decode.
    #[must_use]
    pub fn invalid_token(source: TokenError) -> Self {
        Self::new(ApiErrorKind::InvalidToken, 200, "OK", format!("Invalid session token: {source}"))
            .with_source(source)
    }

    /// The server issued a valid token but the session could not hold it,
    /// because storage refused the write or a sign-out raced with it.
    #[must_use]
    pub fn session_not_established() -> Self {
        Self::new(ApiErrorKind::Unauthenticated, 200, "OK", "Session could not be established")
    }

    /// Attaches an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Reclassifies the error, keeping every other field.
    #[must_use]
    pub fn with_kind(mut self, kind: ApiErrorKind) -> Self {
        self.kind = kind;
        self
    }

    /// Classification of this failure.
    #[must_use]
    pub fn kind(&self) -> ApiErrorKind {
        self.kind
    }

    /// HTTP status, or `0` when no response was obtained.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    /// HTTP status text, or `"Network Error"`.
    #[must_use]
    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// Human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Parsed error body, when the server sent JSON.
    #[must_use]
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Returns `true` if no response was obtained.
    #[must_use]
    pub fn is_network(&self) -> bool {
        self.kind == ApiErrorKind::Network
    }

    /// Returns `true` for any 401, whether client-side or from the server.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.status_code == 401
    }

    /// Returns `true` for a 429.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        self.kind == ApiErrorKind::RateLimited
    }
}

fn message_field<'a>(body: &'a Value, field: &str) -> Option<&'a str> {
    body.get(field).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Canonical reason phrase for `status`, or an empty string.
#[must_use]
pub fn status_text_for(status: u16) -> &'static str {
    reqwest::StatusCode::from_u16(status).ok().and_then(|s| s.canonical_reason()).unwrap_or("")
}

/// Failures reported by a [`Transport`](crate::transport::Transport).
///
/// The gateway turns every one of these into a
/// [`Network`](ApiErrorKind::Network) [`ApiError`].
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// No response arrived within the configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The connection could not be established or was reset.
    #[error("connection failed: {message}")]
    Connect {
        /// Description of the failure.
        message: String,
        /// The underlying error, if available.
        #[source]
        source: Option<BoxError>,
    },

    /// The request could not be built (invalid URL, header or method).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The response body could not be read.
    #[error("failed to read response body: {message}")]
    Body {
        /// Description of the failure.
        message: String,
        /// The underlying error, if available.
        #[source]
        source: Option<BoxError>,
    },
}

impl TransportError {
    /// Creates a [`TransportError::Connect`] without a source.
    #[must_use]
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect { message: message.into(), source: None }
    }
}

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::error::Error as _;

    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_unauthenticated_shape() {
        let err = ApiError::unauthenticated();

        assert_eq!(err.kind(), ApiErrorKind::Unauthenticated);
        assert_eq!(err.status_code(), 401);
        assert_eq!(err.status_text(), "Unauthorized");
        assert_eq!(err.message(), "Authentication required");
        assert!(err.is_unauthorized());
    }

    #[rstest]
    #[case(Some(json!({"message": "Email taken", "detail": "ignored"})), "Email taken")]
    #[case(Some(json!({"detail": "Not found"})), "Not found")]
    #[case(Some(json!({"message": ""})), DEFAULT_ERROR_MESSAGE)]
    #[case(Some(json!({"message": 42})), DEFAULT_ERROR_MESSAGE)]
    #[case(Some(json!([1, 2])), DEFAULT_ERROR_MESSAGE)]
    #[case(None, DEFAULT_ERROR_MESSAGE)]
    fn test_http_error_message(#[case] body: Option<Value>, #[case] expected: &str) {
        let err = ApiError::http(400, "Bad Request", body);

        assert_eq!(err.kind(), ApiErrorKind::Http);
        assert_eq!(err.message(), expected);
    }

    #[test]
    fn test_http_429_is_rate_limited() {
        let err = ApiError::http(429, "Too Many Requests", None);

        assert_eq!(err.kind(), ApiErrorKind::RateLimited);
        assert!(err.is_rate_limited());
    }

    #[test]
    fn test_network_error_keeps_source() {
        let err = ApiError::network(TransportError::Timeout(Duration::from_secs(30)));

        assert_eq!(err.status_code(), NETWORK_ERROR_STATUS);
        assert_eq!(err.status_text(), "Network Error");
        assert_eq!(err.message(), "Unable to connect to the server");
        assert!(err.is_network());
        assert!(err.source().unwrap().to_string().contains("timed out"));
    }

    #[test]
    fn test_invalid_token_wraps_token_error() {
        let err = ApiError::invalid_token(TokenError::missing_claim("email"));

        assert_eq!(err.kind(), ApiErrorKind::InvalidToken);
        assert!(err.message().contains("email"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_with_kind_preserves_fields() {
        let body = json!({"detail": "Token expired"});
        let err = ApiError::http(401, "Unauthorized", Some(body.clone()))
            .with_kind(ApiErrorKind::SessionExpired);

        assert_eq!(err.kind(), ApiErrorKind::SessionExpired);
        assert_eq!(err.message(), "Token expired");
        assert_eq!(err.body(), Some(&body));
    }

    #[test]
    fn test_status_text_for() {
        assert_eq!(status_text_for(404), "Not Found");
        assert_eq!(status_text_for(799), "");
    }
}
