//! Gateway configuration and target host resolution.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable holding an explicit backend origin.
pub const API_URL_ENV: &str = "DASHBOARD_API_URL";

/// Environment variable holding the origin the client is served from.
pub const ORIGIN_ENV: &str = "DASHBOARD_ORIGIN";

/// Backend used when the client itself runs on `localhost`.
pub const DEFAULT_LOCAL_BACKEND_URL: &str = "http://localhost:8000";

/// Prefix for API paths.
pub const DEFAULT_API_PREFIX: &str = "/api";

/// Default per-call timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Endpoints reachable without a session.
pub const DEFAULT_PUBLIC_ROUTES: &[&str] =
    &["/auth/login", "/auth/register", "/auth/verify-otp", "/health-check"];

/// Configuration for [`Gateway`](crate::Gateway).
///
/// # Example
///
/// ```
/// use dashboard_client_gateway::GatewayConfig;
///
/// let config = GatewayConfig::builder().api_url("https://api.example.com/").build()?;
/// assert_eq!(config.base_url(), "https://api.example.com");
/// assert_eq!(config.resolve_path("/contacts"), "/api/contacts");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "GatewayConfigWire", into = "GatewayConfigWire")]
pub struct GatewayConfig {
    /// Explicit backend origin; wins over every other source.
    api_url: Option<String>,

    /// Origin the client is served from. Used for same-origin proxying and
    /// to detect local development.
    origin: Option<String>,

    /// Backend used when `origin` is on `localhost`.
    local_backend_url: String,

    /// Prefix prepended to paths that are not already API or auth paths.
    api_prefix: String,

    /// Path fragments that mark a request as public.
    public_routes: Vec<String>,

    /// Per-call timeout.
    request_timeout: Duration,
}

/// Serialized form of [`GatewayConfig`]; deserialization goes through the
/// validating builder.
#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct GatewayConfigWire {
    #[serde(default)]
    api_url: Option<String>,
    #[serde(default)]
    origin: Option<String>,
    #[serde(default = "default_local_backend_url")]
    local_backend_url: String,
    #[serde(default = "default_api_prefix")]
    api_prefix: String,
    #[serde(default = "default_public_routes")]
    public_routes: Vec<String>,
    #[serde(with = "humantime_serde", default = "default_request_timeout")]
    request_timeout: Duration,
}

impl TryFrom<GatewayConfigWire> for GatewayConfig {
    type Error = ConfigError;

    fn try_from(wire: GatewayConfigWire) -> Result<Self, Self::Error> {
        Self::builder()
            .maybe_api_url(wire.api_url)
            .maybe_origin(wire.origin)
            .local_backend_url(wire.local_backend_url)
            .api_prefix(wire.api_prefix)
            .public_routes(wire.public_routes)
            .request_timeout(wire.request_timeout)
            .build()
    }
}

impl From<GatewayConfig> for GatewayConfigWire {
    fn from(config: GatewayConfig) -> Self {
        Self {
            api_url: config.api_url,
            origin: config.origin,
            local_backend_url: config.local_backend_url,
            api_prefix: config.api_prefix,
            public_routes: config.public_routes,
            request_timeout: config.request_timeout,
        }
    }
}

fn default_local_backend_url() -> String {
    DEFAULT_LOCAL_BACKEND_URL.to_owned()
}

fn default_api_prefix() -> String {
    DEFAULT_API_PREFIX.to_owned()
}

fn default_public_routes() -> Vec<String> {
    DEFAULT_PUBLIC_ROUTES.iter().map(|r| (*r).to_owned()).collect()
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            origin: None,
            local_backend_url: default_local_backend_url(),
            api_prefix: default_api_prefix(),
            public_routes: default_public_routes(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[bon::bon]
impl GatewayConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if:
    /// - `api_url`, `origin` or `local_backend_url` is not an absolute http(s) URL
    /// - `api_prefix` does not start with `/`
    /// - `request_timeout` is zero
    #[builder]
    pub fn new(
        #[builder(into)] api_url: Option<String>,
        #[builder(into)] origin: Option<String>,
        #[builder(into, default = default_local_backend_url())] local_backend_url: String,
        #[builder(into, default = default_api_prefix())] api_prefix: String,
        #[builder(default = default_public_routes())] public_routes: Vec<String>,
        #[builder(default = DEFAULT_REQUEST_TIMEOUT)] request_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            api_url: api_url.filter(|u| !u.trim().is_empty()),
            origin: origin.filter(|o| !o.trim().is_empty()),
            local_backend_url,
            api_prefix,
            public_routes,
            request_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Builds a configuration from [`API_URL_ENV`] and [`ORIGIN_ENV`],
    /// with defaults for everything else. Empty variables count as unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable holds an invalid URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::builder()
            .maybe_api_url(std::env::var(API_URL_ENV).ok())
            .maybe_origin(std::env::var(ORIGIN_ENV).ok())
            .build()
    }
}

impl GatewayConfig {
    /// Checks every field.
    ///
    /// # Errors
    ///
    /// See [`GatewayConfig::new`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(api_url) = &self.api_url {
            check_url("api_url", api_url)?;
        }
        if let Some(origin) = &self.origin {
            check_url("origin", origin)?;
        }
        check_url("local_backend_url", &self.local_backend_url)?;
        if !self.api_prefix.starts_with('/') {
            return Err(ConfigError::Invalid {
                field: "api_prefix",
                reason: format!("must start with '/', got '{}'", self.api_prefix),
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::MustBePositive {
                field: "request_timeout",
                value: "0s".into(),
            });
        }
        Ok(())
    }

    /// Base URL every request path is appended to, without a trailing slash.
    ///
    /// Precedence: `api_url`, then the local backend when `origin` is on
    /// `localhost`, then `origin` itself (same-origin proxying), then the
    /// empty string (paths stay relative).
    #[must_use]
    pub fn base_url(&self) -> String {
        let base = if let Some(api_url) = &self.api_url {
            api_url.as_str()
        } else if let Some(origin) = &self.origin {
            if is_localhost(origin) { self.local_backend_url.as_str() } else { origin.as_str() }
        } else {
            ""
        };
        base.trim_end_matches('/').to_owned()
    }

    /// [`base_url`](Self::base_url) for transports that cannot send
    /// relative URLs.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when neither `api_url` nor `origin`
    /// is set.
    pub fn absolute_base_url(&self) -> Result<String, ConfigError> {
        let base = self.base_url();
        if base.is_empty() {
            return Err(ConfigError::Invalid {
                field: "api_url",
                reason: "an absolute backend URL requires api_url or origin".into(),
            });
        }
        Ok(base)
    }

    /// Maps a caller path onto the backend's path layout.
    ///
    /// Auth paths and paths already under the API prefix are kept; anything
    /// else is placed under the API prefix.
    #[must_use]
    pub fn resolve_path(&self, path: &str) -> String {
        let path = if path.starts_with('/') { path.to_owned() } else { format!("/{path}") };
        let prefix = self.api_prefix.trim_end_matches('/');
        if path.starts_with("/auth") || path.starts_with(prefix) {
            path
        } else {
            format!("{prefix}{path}")
        }
    }

    /// Returns `true` if `path` contains one of the public route fragments.
    #[must_use]
    pub fn is_public_route(&self, path: &str) -> bool {
        self.public_routes.iter().any(|route| path.contains(route.as_str()))
    }

    /// Explicit backend origin, if configured.
    #[must_use]
    pub fn api_url(&self) -> Option<&str> {
        self.api_url.as_deref()
    }

    /// Origin the client is served from, if configured.
    #[must_use]
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// Prefix for API paths.
    #[must_use]
    pub fn api_prefix(&self) -> &str {
        &self.api_prefix
    }

    /// Path fragments that mark a request as public.
    #[must_use]
    pub fn public_routes(&self) -> &[String] {
        &self.public_routes
    }

    /// Per-call timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

fn check_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    match reqwest::Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Ok(()),
        Ok(url) => Err(ConfigError::Invalid {
            field,
            reason: format!("unsupported URL '{value}' (scheme '{}')", url.scheme()),
        }),
        Err(e) => Err(ConfigError::Invalid {
            field,
            reason: format!("invalid URL '{value}': {e}"),
        }),
    }
}

fn is_localhost(origin: &str) -> bool {
    reqwest::Url::parse(origin).ok().is_some_and(|url| url.host_str() == Some("localhost"))
}
