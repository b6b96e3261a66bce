//! Session store configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Storage key holding the raw bearer token.
pub const DEFAULT_STORAGE_KEY: &str = "__auth_token";

/// Minimum spacing between re-derivations triggered by storage events.
pub const DEFAULT_THROTTLE_INTERVAL: Duration = Duration::from_millis(300);

/// Configuration for [`SessionStore`](crate::SessionStore).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use dashboard_client_session::SessionConfig;
///
/// let config = SessionConfig::builder()
///     .storage_key("__auth_token")
///     .throttle_interval(Duration::from_millis(500))
///     .build()?;
/// assert_eq!(config.throttle_interval(), Duration::from_millis(500));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SessionConfigWire", into = "SessionConfigWire")]
pub struct SessionConfig {
    /// Key under which the token is persisted.
    storage_key: String,

    /// Minimum spacing between storage-triggered re-derivations.
    throttle_interval: Duration,

    /// Treat tokens whose `exp` has passed as no session.
    reject_expired: bool,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SessionConfigWire {
    #[serde(default = "default_storage_key")]
    storage_key: String,
    #[serde(with = "humantime_serde", default = "default_throttle_interval")]
    throttle_interval: Duration,
    #[serde(default)]
    reject_expired: bool,
}

impl TryFrom<SessionConfigWire> for SessionConfig {
    type Error = ConfigError;

    fn try_from(wire: SessionConfigWire) -> Result<Self, Self::Error> {
        Self::builder()
            .storage_key(wire.storage_key)
            .throttle_interval(wire.throttle_interval)
            .reject_expired(wire.reject_expired)
            .build()
    }
}

impl From<SessionConfig> for SessionConfigWire {
    fn from(config: SessionConfig) -> Self {
        Self {
            storage_key: config.storage_key,
            throttle_interval: config.throttle_interval,
            reject_expired: config.reject_expired,
        }
    }
}

fn default_storage_key() -> String {
    DEFAULT_STORAGE_KEY.to_owned()
}

fn default_throttle_interval() -> Duration {
    DEFAULT_THROTTLE_INTERVAL
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            storage_key: default_storage_key(),
            throttle_interval: DEFAULT_THROTTLE_INTERVAL,
            reject_expired: false,
        }
    }
}

#[bon::bon]
impl SessionConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if:
    /// - `storage_key` is empty
    /// - `throttle_interval` is zero
    #[builder]
    pub fn new(
        #[builder(into, default = default_storage_key())] storage_key: String,
        #[builder(default = DEFAULT_THROTTLE_INTERVAL)] throttle_interval: Duration,
        #[builder(default)] reject_expired: bool,
    ) -> Result<Self, ConfigError> {
        if storage_key.is_empty() {
            return Err(ConfigError::Invalid {
                field: "storage_key",
                reason: "must not be empty".into(),
            });
        }
        if throttle_interval.is_zero() {
            return Err(ConfigError::MustBePositive {
                field: "throttle_interval",
                value: "0s".into(),
            });
        }
        Ok(Self { storage_key, throttle_interval, reject_expired })
    }

    /// Key under which the token is persisted.
    #[must_use]
    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    /// Minimum spacing between storage-triggered re-derivations.
    #[must_use]
    pub fn throttle_interval(&self) -> Duration {
        self.throttle_interval
    }

    /// Whether expired tokens are treated as no session.
    #[must_use]
    pub fn reject_expired(&self) -> bool {
        self.reject_expired
    }
}
