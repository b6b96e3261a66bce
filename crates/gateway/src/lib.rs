//! # Dashboard Client Gateway
//!
//! The single path from the dashboard client to its API. Every call goes
//! through the [`Gateway`], which attaches the session credential, folds
//! identical concurrent calls into one, and classifies every outcome into an
//! [`ApiError`]. On top of it sit the [`QueryClient`], which caches reads
//! under a [`QueryPolicy`], and [`AuthApi`], the typed sign-in endpoints.
//!
//! This crate provides:
//! - **Gateway**: Authenticated requests with deduplication and error classification
//! - **Transport**: A pluggable HTTP layer with a `reqwest` implementation
//! - **Query client**: Freshness, idle eviction and retry policy for reads and writes
//! - **Auth API**: Login, sign-up, one-time password and profile calls
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌─────────┐   ┌──────────────┐   ┌───────────┐
//! │ AuthApi  │──→│ QueryClient │──→│ Gateway │──→│ Deduplicator │──→│ Transport │
//! └──────────┘   └─────────────┘   └────┬────┘   └──────────────┘   └───────────┘
//!                                       │ token / handle_unauthorized
//!                                       ↓
//!                                ┌──────────────┐
//!                                │ SessionStore │
//!                                └──────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use dashboard_client_gateway::{Gateway, GatewayConfig, RequestDescriptor};
//! use dashboard_client_session::{MemoryTokenStorage, SessionConfig, SessionStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = SessionStore::new(Arc::new(MemoryTokenStorage::new()), SessionConfig::default());
//! let config = GatewayConfig::builder().api_url("https://api.example.com").build()?;
//! let gateway = Gateway::with_reqwest(config, session)?;
//!
//! let contacts: serde_json::Value =
//!     gateway.request(&RequestDescriptor::get("/contacts").param("page", 1)).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with a scripted transport, a recording
//!   notifier and session fixtures for use in downstream test suites.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Typed authentication endpoints.
pub mod auth;
/// Gateway configuration.
pub mod config;
/// In-flight request deduplication.
pub mod dedup;
/// Request descriptors.
pub mod descriptor;
/// Gateway error types.
pub mod error;
/// The authenticated gateway.
pub mod gateway;
/// Gateway and query counters.
pub mod metrics;
/// User-visible notifications.
pub mod notify;
/// Query and mutation policy.
pub mod policy;
/// The query cache.
pub mod query;
/// HTTP transport abstraction.
pub mod transport;

/// Shared test utilities.
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;

// Re-export key types for convenience
pub use auth::{
    AuthApi, AuthUser, CurrentUser, LoginResponse, RegisterRequest, RegisterResponse,
    VerifyOtpRequest, VerifyOtpResponse,
};
pub use config::GatewayConfig;
pub use dedup::Deduplicator;
pub use descriptor::{Method, ParamValue, RequestDescriptor};
pub use error::{ApiError, ApiErrorKind, ConfigError, Result, TransportError};
pub use gateway::Gateway;
pub use metrics::{GatewayMetricsSnapshot, QueryMetricsSnapshot};
pub use notify::{Notification, NotificationLevel, Notifier, RATE_LIMIT_MESSAGE, TracingNotifier};
pub use policy::{NetworkMode, QueryOptions, QueryPolicy};
pub use query::{QueryClient, QueryResult, QueryStatus};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
