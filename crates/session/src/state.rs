//! Session state.

use crate::token::TokenClaims;

/// Authentication state of the client.
///
/// Exactly one variant holds at a time. `Unknown` only exists before the
/// persisted token has been read for the first time and is never re-entered.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Persisted storage has not been read yet.
    #[default]
    Unknown,
    /// A token decoded into valid claims.
    Authenticated {
        /// Claims decoded from `token`.
        claims: TokenClaims,
        /// The bearer credential.
        token: String,
    },
    /// No usable token.
    Unauthenticated,
}

impl SessionState {
    /// Returns `true` for [`Authenticated`](Self::Authenticated).
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }

    /// Returns `true` for [`Unknown`](Self::Unknown).
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    /// The bearer token, when authenticated.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Authenticated { token, .. } => Some(token),
            _ => None,
        }
    }

    /// The decoded claims, when authenticated.
    #[must_use]
    pub fn claims(&self) -> Option<&TokenClaims> {
        match self {
            Self::Authenticated { claims, .. } => Some(claims),
            _ => None,
        }
    }

    /// Short tag for logging.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Authenticated { .. } => "authenticated",
            Self::Unauthenticated => "unauthenticated",
        }
    }

    /// Whether moving from `self` to `next` is observable to subscribers.
    ///
    /// Two authenticated states are the same session when token, subject and
    /// email all match; profile details such as the display name are not
    /// compared.
    #[must_use]
    pub fn differs_from(&self, next: &Self) -> bool {
        match (self, next) {
            (
                Self::Authenticated { claims: a, token: ta },
                Self::Authenticated { claims: b, token: tb },
            ) => ta != tb || a.subject_id != b.subject_id || a.email != b.email,
            (Self::Unknown, Self::Unknown) | (Self::Unauthenticated, Self::Unauthenticated) => {
                false
            },
            _ => true,
        }
    }
}
