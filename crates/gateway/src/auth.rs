//! Typed authentication endpoints.
//!
//! [`AuthApi`] pairs the [`Gateway`] with the session store: it signs users
//! in and up, stores the issued token, and loads the signed-in user's
//! profile through the [`QueryClient`].
//!
//! | Call | Endpoint | Public |
//! |------|----------|--------|
//! | [`login`](AuthApi::login) | `POST /api/auth/login` | yes |
//! | [`register`](AuthApi::register) | `POST /auth/register` | yes |
//! | [`verify_otp`](AuthApi::verify_otp) | `POST /auth/verify-otp` | yes |
//! | [`current_user`](AuthApi::current_user) | `GET /api/users/me` | no |

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    descriptor::RequestDescriptor,
    error::{ApiError, ApiErrorKind},
    gateway::Gateway,
    notify::{Notifier, TracingNotifier},
    policy::QueryOptions,
    query::{QueryClient, QueryResult},
};

/// Sign-in endpoint.
pub const LOGIN_PATH: &str = "/api/auth/login";

/// Sign-up endpoint; sends a one-time password.
pub const REGISTER_PATH: &str = "/auth/register";

/// One-time password confirmation endpoint.
pub const VERIFY_OTP_PATH: &str = "/auth/verify-otp";

/// Signed-in user's profile.
pub const CURRENT_USER_PATH: &str = "/api/users/me";

/// Query key for the signed-in user's profile.
pub const CURRENT_USER_QUERY_KEY: &str = "currentUser";

/// Minimal user record returned with an issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    /// User identifier.
    pub id: String,
    /// Email address.
    pub email: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
}

/// Successful sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginResponse {
    /// The issued bearer token, already stored in the session.
    pub token: String,
    /// The signed-in user.
    pub user: Option<AuthUser>,
}

#[derive(Debug, Deserialize)]
struct TokenEnvelope {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    user: Option<AuthUser>,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// Sign-up details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    /// Chosen username.
    pub username: String,
    /// Email address the one-time password is sent to.
    pub email: String,
    /// Chosen password.
    pub password: String,
    /// Display name.
    pub name: String,
    /// Invitation to join an existing organization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_invite_slug: Option<String>,
}

/// Result of a sign-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    /// Whether a one-time password was sent.
    #[serde(default)]
    pub is_otp_sent: bool,
    /// Server message.
    #[serde(default)]
    pub message: Option<String>,
}

/// Sign-up details plus the one-time password received by email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOtpRequest {
    /// The details submitted to [`AuthApi::register`].
    #[serde(flatten)]
    pub registration: RegisterRequest,
    /// One-time password.
    pub otp: String,
}

/// Result of a one-time password confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOtpResponse {
    /// The issued token, if any; stored in the session when present.
    pub token: Option<String>,
    /// The new user.
    pub user: Option<AuthUser>,
}

/// The signed-in user's profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentUser {
    /// User identifier.
    #[serde(alias = "unique_id")]
    pub id: String,
    /// Email address.
    pub email: String,
    /// Username.
    #[serde(default)]
    pub username: Option<String>,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Role within the organization.
    #[serde(default)]
    pub role: Option<String>,
    /// Organization the user belongs to.
    #[serde(default)]
    pub organization_id: Option<String>,
    /// Any other profile fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Authentication calls over a [`Gateway`].
#[derive(Clone)]
pub struct AuthApi {
    gateway: Gateway,
    queries: QueryClient,
    notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for AuthApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthApi")
            .field("gateway", &self.gateway)
            .field("queries", &self.queries)
            .finish_non_exhaustive()
    }
}

impl AuthApi {
    /// Creates the API; notifications go to a [`TracingNotifier`].
    #[must_use]
    pub fn new(gateway: Gateway, queries: QueryClient) -> Self {
        Self { gateway, queries, notifier: Arc::new(TracingNotifier) }
    }

    /// Replaces the notifier used for rate-limited writes.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Signs in and stores the issued token.
    ///
    /// Any failure leaves the session signed out.
    ///
    /// # Errors
    ///
    /// Returns the gateway's error, an
    /// [`InvalidResponse`](ApiErrorKind::InvalidResponse) error if no token
    /// was issued, an [`InvalidToken`](ApiErrorKind::InvalidToken) error if
    /// the token cannot be decoded, or an
    /// [`Unauthenticated`](ApiErrorKind::Unauthenticated) error if the
    /// session could not keep it.
    #[tracing::instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let result = self.try_login(username, password).await;
        match &result {
            Ok(response) => {
                let user = response.user.as_ref().map(|user| user.id.as_str());
                tracing::info!(user, "signed in");
            },
            Err(err) => {
                tracing::debug!(error = %err, "sign-in failed; clearing session");
                self.gateway.session().logout();
            },
        }
        result
    }

    async fn try_login(&self, username: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let descriptor = RequestDescriptor::post(LOGIN_PATH)
            .json_from(&LoginRequest { username, password })
            .map_err(|e| ApiError::invalid_response(0, "Unserializable request").with_source(e))?
            .public();
        let envelope = self.mutate::<TokenEnvelope>(&descriptor).await?;

        let Some(token) = envelope.token.filter(|token| !token.is_empty()) else {
            return Err(ApiError::invalid_response(200, "Invalid response: Missing token"));
        };
        self.store_token(&token)?;
        Ok(LoginResponse { token, user: envelope.user })
    }

    /// Starts a sign-up; the server emails a one-time password.
    ///
    /// # Errors
    ///
    /// Returns the gateway's error.
    #[tracing::instrument(skip_all, fields(username = %request.username))]
    pub async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, ApiError> {
        let descriptor = RequestDescriptor::post(REGISTER_PATH)
            .json_from(request)
            .map_err(|e| ApiError::invalid_response(0, "Unserializable request").with_source(e))?
            .public();
        self.mutate(&descriptor).await
    }

    /// Completes a sign-up and stores the issued token, if any.
    ///
    /// # Errors
    ///
    /// Returns the gateway's error, an
    /// [`InvalidToken`](ApiErrorKind::InvalidToken) error if the token cannot
    /// be decoded, or an [`Unauthenticated`](ApiErrorKind::Unauthenticated)
    /// error if the session could not keep it.
    #[tracing::instrument(skip_all, fields(username = %request.registration.username))]
    pub async fn verify_otp(
        &self,
        request: &VerifyOtpRequest,
    ) -> Result<VerifyOtpResponse, ApiError> {
        let descriptor = RequestDescriptor::post(VERIFY_OTP_PATH)
            .json_from(request)
            .map_err(|e| ApiError::invalid_response(0, "Unserializable request").with_source(e))?
            .public();
        let envelope = self.mutate::<TokenEnvelope>(&descriptor).await?;

        let token = envelope.token.filter(|token| !token.is_empty());
        if let Some(token) = &token {
            self.store_token(token)?;
            tracing::info!("sign-up verified; signed in");
        }
        Ok(VerifyOtpResponse { token, user: envelope.user })
    }

    /// Loads the signed-in user's profile.
    ///
    /// Served from cache for five minutes. Failures other than 401 are
    /// retried twice; a 401 signs the user out.
    ///
    /// # Errors
    ///
    /// Only when the query policy enables `throw_on_error`.
    pub async fn current_user(&self) -> Result<QueryResult<CurrentUser>, ApiError> {
        let descriptor = &RequestDescriptor::get(CURRENT_USER_PATH);
        let gateway = &self.gateway;
        let result = self
            .queries
            .fetch_query(CURRENT_USER_QUERY_KEY, &QueryOptions::CURRENT_USER, move || {
                gateway.request::<CurrentUser>(descriptor)
            })
            .await;

        let unauthorized = match &result {
            Ok(query) => query.error.as_ref().is_some_and(ApiError::is_unauthorized),
            Err(err) => err.is_unauthorized(),
        };
        if unauthorized {
            self.logout();
        }
        result
    }

    /// Signs out and drops every cached query.
    pub fn logout(&self) {
        self.gateway.session().logout();
        self.queries.clear();
    }

    /// The gateway in use.
    #[must_use]
    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// The query client in use.
    #[must_use]
    pub fn queries(&self) -> &QueryClient {
        &self.queries
    }

    async fn mutate<T: serde::de::DeserializeOwned>(
        &self,
        descriptor: &RequestDescriptor,
    ) -> Result<T, ApiError> {
        let gateway = &self.gateway;
        self.queries
            .execute_mutation(self.notifier.as_ref(), move || gateway.request::<T>(descriptor))
            .await
    }

    fn store_token(&self, token: &str) -> Result<(), ApiError> {
        let state = self.gateway.session().set_token(Some(token)).map_err(|e| {
            tracing::warn!(error = %e, "server issued an undecodable token");
            ApiError::invalid_token(e)
        })?;
        if !state.is_authenticated() {
            tracing::warn!("issued token was not kept; session remains signed out");
            return Err(ApiError::session_not_established());
        }
        Ok(())
    }
}
