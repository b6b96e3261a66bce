//! Shared test utilities for session testing.
//!
//! Helpers for minting well-formed session tokens, crafting raw tokens with
//! arbitrary header and payload JSON (for malformed-token tests), and
//! storage backends that fail. Feature-gated behind `testutil`.
//!
//! ```toml
//! [dev-dependencies]
//! dashboard-client-session = { path = "../session", features = ["testutil"] }
//! ```

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey, Header};

use crate::{
    error::{StorageError, StorageResult},
    storage::{MemoryTokenStorage, StorageEventBus, StorageEvents, TokenStorage},
    token::TokenClaims,
};

/// HMAC secret used for test tokens. The client never checks signatures.
const TEST_SECRET: &[u8] = b"dashboard-client-test-secret";

/// A representative set of claims.
#[must_use]
pub fn test_claims() -> TokenClaims {
    TokenClaims {
        subject_id: "usr_01HXYZ".into(),
        email: "ada@example.com".into(),
        username: "ada".into(),
        role: Some("owner".into()),
        organization_id: Some("org_01HXYZ".into()),
        name: "Ada Lovelace".into(),
        exp: None,
    }
}

/// Claims for a different user, for identity-change tests.
#[must_use]
pub fn other_claims() -> TokenClaims {
    TokenClaims {
        subject_id: "usr_02ABCD".into(),
        email: "grace@example.com".into(),
        username: "grace".into(),
        role: Some("member".into()),
        organization_id: None,
        name: "Grace Hopper".into(),
        exp: None,
    }
}

/// Encodes `claims` into an HS256-signed JWT.
///
/// # Panics
///
/// Panics if encoding fails (should not happen with valid inputs).
#[must_use]
pub fn encode_test_token(claims: &TokenClaims) -> String {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(TEST_SECRET),
    )
    .expect("Failed to encode test token")
}

/// Builds a token from raw header and payload JSON with a fake signature.
///
/// # Panics
///
/// Panics if the JSON values cannot be serialized.
#[must_use]
pub fn craft_raw_token(header: &serde_json::Value, payload: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header).expect("serialize header"));
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload).expect("serialize payload"));
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

/// A [`TokenStorage`] whose every operation fails.
#[derive(Debug, Default)]
pub struct FailingTokenStorage;

impl TokenStorage for FailingTokenStorage {
    fn get(&self, _key: &str) -> StorageResult<Option<String>> {
        Err(StorageError::unavailable("storage disabled"))
    }

    fn set(&self, _key: &str, _value: &str) -> StorageResult<()> {
        Err(StorageError::unavailable("quota exceeded"))
    }

    fn remove(&self, _key: &str) -> StorageResult<bool> {
        Err(StorageError::unavailable("storage disabled"))
    }

    fn subscribe(&self) -> StorageEvents {
        // Nothing is ever published; the stream closes immediately.
        let bus = StorageEventBus::new();
        bus.subscribe(bus.register())
    }
}

/// A handle on a [`MemoryTokenStorage`] area that can read and remove but
/// refuses every write.
#[derive(Debug)]
pub struct ReadOnlyTokenStorage {
    inner: MemoryTokenStorage,
}

impl ReadOnlyTokenStorage {
    /// Wraps a handle on `area`.
    #[must_use]
    pub fn new(area: &MemoryTokenStorage) -> Self {
        Self { inner: area.handle() }
    }
}

impl TokenStorage for ReadOnlyTokenStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, _key: &str, _value: &str) -> StorageResult<()> {
        Err(StorageError::unavailable("quota exceeded"))
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        self.inner.remove(key)
    }

    fn subscribe(&self) -> StorageEvents {
        self.inner.subscribe()
    }
}
