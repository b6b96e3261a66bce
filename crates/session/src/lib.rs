//! # Dashboard Client Session
//!
//! Client-side session handling for the dashboard: decoding the bearer token
//! issued by the API, persisting it, and deriving a single authoritative
//! [`SessionState`] that every other part of the client reads.
//!
//! This crate provides:
//! - **Token codec**: Shape-checked decoding of the session JWT into [`TokenClaims`]
//! - **Token storage**: Persisted key/value areas shared between client instances
//! - **Session store**: The tri-state session with cross-instance synchronization
//! - **Route guard**: Navigation decisions derived from the session state
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  set_token / logout   ┌──────────────┐    get / set    ┌──────────────┐
//! │   callers    │ ────────────────────→ │ SessionStore │ ──────────────→ │ TokenStorage │
//! └──────────────┘                       └──────┬───────┘                 └──────┬───────┘
//!        ↑                                      │ watch                          │ events from
//!        └────────── state() / subscribe ───────┘ ←───── Throttle ←──────────────┘ other handles
//! ```
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use dashboard_client_session::{MemoryTokenStorage, SessionConfig, SessionState, SessionStore};
//!
//! let store = SessionStore::new(Arc::new(MemoryTokenStorage::new()), SessionConfig::default());
//! assert_eq!(store.state(), SessionState::Unauthenticated);
//! assert!(store.set_token(Some("not-a-jwt")).is_err());
//! ```
//!
//! ## Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with token minting helpers and failing
//!   storage backends for use in downstream test suites.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Session configuration.
pub mod config;
/// Session error types.
pub mod error;
/// Navigation decisions.
pub mod guard;
/// Session state.
pub mod state;
/// Persisted token storage.
pub mod storage;
/// The session store.
pub mod store;
/// Leading/trailing throttle.
pub mod throttle;
/// Session token decoding.
pub mod token;

/// Shared test utilities.
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;

// Re-export key types for convenience
pub use config::{DEFAULT_STORAGE_KEY, DEFAULT_THROTTLE_INTERVAL, SessionConfig};
pub use error::{BoxError, ConfigError, StorageError, StorageResult, TokenError};
pub use guard::{Navigation, decide as decide_navigation};
pub use state::SessionState;
pub use storage::{
    FileTokenStorage, MemoryTokenStorage, StorageEvent, StorageEventBus, StorageEvents,
    TokenStorage,
};
pub use store::{SessionStore, Subscription};
pub use throttle::{Throttle, TriggerOutcome};
pub use token::{TokenClaims, decode as decode_token};
