//! User-visible notifications.
//!
//! The query layer never renders anything itself. When a failure must be
//! shown to the user (a throttled write), it hands a [`Notification`] to the
//! [`Notifier`] the caller supplied.

use std::fmt;

/// Shown when a mutation is rejected with 429.
pub const RATE_LIMIT_MESSAGE: &str =
    "You have hit the rate limit. Please try again after some time.";

/// Severity of a [`Notification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationLevel {
    /// Informational.
    Info,
    /// Something the user should correct or wait out.
    Error,
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Error => "error",
        })
    }
}

/// A message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Severity.
    pub level: NotificationLevel,
    /// Text shown to the user.
    pub message: String,
}

impl Notification {
    /// An error notification.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self { level: NotificationLevel::Error, message: message.into() }
    }

    /// An informational notification.
    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self { level: NotificationLevel::Info, message: message.into() }
    }

    /// The notification raised for a rate-limited mutation.
    #[must_use]
    pub fn rate_limited() -> Self {
        Self::error(RATE_LIMIT_MESSAGE)
    }
}

/// Delivers notifications to the user.
pub trait Notifier: Send + Sync {
    /// Shows `notification`.
    fn notify(&self, notification: Notification);
}

/// [`Notifier`] that emits each notification as a `tracing` event.
///
/// Useful for headless clients and as a default when no UI is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        match notification.level {
            NotificationLevel::Info => {
                tracing::info!(target: "dashboard_client::notify", "{}", notification.message);
            },
            NotificationLevel::Error => {
                tracing::warn!(target: "dashboard_client::notify", "{}", notification.message);
            },
        }
    }
}
