//! Session error types.
//!
//! Three families of errors live here:
//!
//! - [`TokenError`] - a session token could not be decoded into claims
//! - [`StorageError`] - the persisted token could not be read or written
//! - [`ConfigError`] - a configuration value failed validation
//!
//! None of these ever escape the [`SessionStore`](crate::SessionStore) as a
//! panic or an unhandled failure: token and storage errors collapse the
//! session to [`SessionState::Unauthenticated`](crate::SessionState).

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Errors produced while decoding a session token.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum TokenError {
    /// Token is structurally malformed and cannot be decoded.
    #[error("Invalid token format: {0}")]
    InvalidFormat(String),

    /// A required claim is absent.
    #[error("Missing claim: {0}")]
    MissingClaim(String),

    /// A claim is present but has the wrong type or an unusable value.
    #[error("Invalid claim '{claim}': {reason}")]
    InvalidClaim {
        /// Name of the offending claim.
        claim: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// Token carries an `exp` claim in the past.
    #[error("Token expired")]
    Expired,
}

impl TokenError {
    /// Creates an [`InvalidFormat`](Self::InvalidFormat) error.
    #[must_use]
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat(message.into())
    }

    /// Creates a [`MissingClaim`](Self::MissingClaim) error.
    #[must_use]
    pub fn missing_claim(claim: impl Into<String>) -> Self {
        Self::MissingClaim(claim.into())
    }

    /// Creates an [`InvalidClaim`](Self::InvalidClaim) error.
    #[must_use]
    pub fn invalid_claim(claim: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidClaim { claim: claim.into(), reason: reason.into() }
    }
}

/// Errors raised by a [`TokenStorage`](crate::storage::TokenStorage) backend.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// Reading or writing the underlying medium failed.
    #[error("Storage I/O error: {message}")]
    Io {
        /// Description of the failure.
        message: String,
        /// The underlying I/O error.
        #[source]
        source: Option<BoxError>,
    },

    /// The storage area is not available (disabled, quota exceeded, closed).
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Creates an [`Io`](Self::Io) error wrapping its source.
    #[must_use]
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates an [`Unavailable`](Self::Unavailable) error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A duration or count that must be non-zero was zero.
    #[error("{field} must be positive, got {value}")]
    MustBePositive {
        /// Name of the field.
        field: &'static str,
        /// Rejected value, rendered for display.
        value: String,
    },

    /// A value fell below its allowed minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// Name of the field.
        field: &'static str,
        /// Smallest accepted value.
        min: String,
        /// Rejected value, rendered for display.
        value: String,
    },

    /// A value is malformed.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Name of the field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Result type alias for token decoding.
pub type Result<T> = std::result::Result<T, TokenError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
