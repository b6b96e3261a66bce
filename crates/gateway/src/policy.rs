//! Query and mutation policy.
//!
//! [`QueryPolicy`] is the contract handed to the query cache: how long a
//! successful read stays fresh, how long an unused entry is kept, which
//! failures are retried and how errors reach the caller.
//!
//! # Retry Rules
//!
//! - A 401 is never retried; the session-expiry flow handles it.
//! - Network failures (status `0`) are retried up to `max_network_retries` times.
//! - Other HTTP failures are retried only when `retry_http_errors` is on.
//! - Mutations are not retried unless `mutation_retry` is on.
//!
//! # Backoff Strategy
//!
//! Retries use exponential backoff with jitter:
//! - Base delay doubles with each retry: `retry_initial_backoff * 2^retry`
//! - Random jitter of 0–50% of the computed delay is added
//! - The result never exceeds `retry_max_backoff`

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ConfigError};

/// Default freshness window.
pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(30);

/// Default idle time before an unused entry is evicted.
pub const DEFAULT_GC_TIME: Duration = Duration::from_secs(5 * 60);

/// Default number of retries for network failures.
pub const DEFAULT_MAX_NETWORK_RETRIES: u32 = 2;

/// Default delay before the first retry.
pub const DEFAULT_RETRY_INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Default ceiling for retry delays.
pub const DEFAULT_RETRY_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// When queries may hit the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkMode {
    /// Only while online; offline fetches are paused.
    #[default]
    Online,
    /// Regardless of connectivity.
    Always,
}

/// Cache and retry policy for reads and writes.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use dashboard_client_gateway::QueryPolicy;
///
/// let policy = QueryPolicy::builder().stale_time(Duration::from_secs(10)).build()?;
/// assert_eq!(policy.stale_time(), Duration::from_secs(10));
/// assert!(!policy.refetch_on_window_focus());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "QueryPolicyWire", into = "QueryPolicyWire")]
pub struct QueryPolicy {
    /// How long a successful read is served without a network call.
    stale_time: Duration,

    /// How long an unused entry is kept before eviction.
    gc_time: Duration,

    /// Retries allowed for a failing read.
    max_network_retries: u32,

    /// Whether non-network failures (other than 401) are retried too.
    retry_http_errors: bool,

    /// Delay before the first retry.
    retry_initial_backoff: Duration,

    /// Ceiling for retry delays.
    retry_max_backoff: Duration,

    /// Invalidate cached reads when the window regains focus.
    refetch_on_window_focus: bool,

    /// When reads may hit the network.
    network_mode: NetworkMode,

    /// Return read failures as `Err` instead of in the result's error channel.
    throw_on_error: bool,

    /// Retry failing mutations under the read rules.
    mutation_retry: bool,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct QueryPolicyWire {
    #[serde(with = "humantime_serde", default = "default_stale_time")]
    stale_time: Duration,
    #[serde(with = "humantime_serde", default = "default_gc_time")]
    gc_time: Duration,
    #[serde(default = "default_max_network_retries")]
    max_network_retries: u32,
    #[serde(default)]
    retry_http_errors: bool,
    #[serde(with = "humantime_serde", default = "default_retry_initial_backoff")]
    retry_initial_backoff: Duration,
    #[serde(with = "humantime_serde", default = "default_retry_max_backoff")]
    retry_max_backoff: Duration,
    #[serde(default)]
    refetch_on_window_focus: bool,
    #[serde(default)]
    network_mode: NetworkMode,
    #[serde(default)]
    throw_on_error: bool,
    #[serde(default)]
    mutation_retry: bool,
}

impl TryFrom<QueryPolicyWire> for QueryPolicy {
    type Error = ConfigError;

    fn try_from(wire: QueryPolicyWire) -> Result<Self, Self::Error> {
        Self::builder()
            .stale_time(wire.stale_time)
            .gc_time(wire.gc_time)
            .max_network_retries(wire.max_network_retries)
            .retry_http_errors(wire.retry_http_errors)
            .retry_initial_backoff(wire.retry_initial_backoff)
            .retry_max_backoff(wire.retry_max_backoff)
            .refetch_on_window_focus(wire.refetch_on_window_focus)
            .network_mode(wire.network_mode)
            .throw_on_error(wire.throw_on_error)
            .mutation_retry(wire.mutation_retry)
            .build()
    }
}

impl From<QueryPolicy> for QueryPolicyWire {
    fn from(policy: QueryPolicy) -> Self {
        Self {
            stale_time: policy.stale_time,
            gc_time: policy.gc_time,
            max_network_retries: policy.max_network_retries,
            retry_http_errors: policy.retry_http_errors,
            retry_initial_backoff: policy.retry_initial_backoff,
            retry_max_backoff: policy.retry_max_backoff,
            refetch_on_window_focus: policy.refetch_on_window_focus,
            network_mode: policy.network_mode,
            throw_on_error: policy.throw_on_error,
            mutation_retry: policy.mutation_retry,
        }
    }
}

fn default_stale_time() -> Duration {
    DEFAULT_STALE_TIME
}

fn default_gc_time() -> Duration {
    DEFAULT_GC_TIME
}

fn default_max_network_retries() -> u32 {
    DEFAULT_MAX_NETWORK_RETRIES
}

fn default_retry_initial_backoff() -> Duration {
    DEFAULT_RETRY_INITIAL_BACKOFF
}

fn default_retry_max_backoff() -> Duration {
    DEFAULT_RETRY_MAX_BACKOFF
}

impl Default for QueryPolicy {
    fn default() -> Self {
        Self {
            stale_time: DEFAULT_STALE_TIME,
            gc_time: DEFAULT_GC_TIME,
            max_network_retries: DEFAULT_MAX_NETWORK_RETRIES,
            retry_http_errors: false,
            retry_initial_backoff: DEFAULT_RETRY_INITIAL_BACKOFF,
            retry_max_backoff: DEFAULT_RETRY_MAX_BACKOFF,
            refetch_on_window_focus: false,
            network_mode: NetworkMode::Online,
            throw_on_error: false,
            mutation_retry: false,
        }
    }
}

#[bon::bon]
impl QueryPolicy {
    /// Creates a validated policy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if:
    /// - `gc_time` is zero
    /// - `retry_initial_backoff` is zero
    /// - `retry_max_backoff` is below `retry_initial_backoff`
    #[builder]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        #[builder(default = DEFAULT_STALE_TIME)] stale_time: Duration,
        #[builder(default = DEFAULT_GC_TIME)] gc_time: Duration,
        #[builder(default = DEFAULT_MAX_NETWORK_RETRIES)] max_network_retries: u32,
        #[builder(default)] retry_http_errors: bool,
        #[builder(default = DEFAULT_RETRY_INITIAL_BACKOFF)] retry_initial_backoff: Duration,
        #[builder(default = DEFAULT_RETRY_MAX_BACKOFF)] retry_max_backoff: Duration,
        #[builder(default)] refetch_on_window_focus: bool,
        #[builder(default)] network_mode: NetworkMode,
        #[builder(default)] throw_on_error: bool,
        #[builder(default)] mutation_retry: bool,
    ) -> Result<Self, ConfigError> {
        let policy = Self {
            stale_time,
            gc_time,
            max_network_retries,
            retry_http_errors,
            retry_initial_backoff,
            retry_max_backoff,
            refetch_on_window_focus,
            network_mode,
            throw_on_error,
            mutation_retry,
        };
        policy.validate()?;
        Ok(policy)
    }
}

impl QueryPolicy {
    /// Checks every field.
    ///
    /// # Errors
    ///
    /// See [`QueryPolicy::new`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gc_time.is_zero() {
            return Err(ConfigError::MustBePositive { field: "gc_time", value: "0s".into() });
        }
        if self.retry_initial_backoff.is_zero() {
            return Err(ConfigError::MustBePositive {
                field: "retry_initial_backoff",
                value: "0s".into(),
            });
        }
        if self.retry_max_backoff < self.retry_initial_backoff {
            return Err(ConfigError::BelowMinimum {
                field: "retry_max_backoff",
                min: format!("{:?}", self.retry_initial_backoff),
                value: format!("{:?}", self.retry_max_backoff),
            });
        }
        Ok(())
    }

    /// Returns `true` if a read that has already been retried `retries`
    /// times should be retried after failing with `error`.
    #[must_use]
    pub fn should_retry(&self, retries: u32, error: &ApiError) -> bool {
        if error.is_unauthorized() || retries >= self.max_network_retries {
            return false;
        }
        error.is_network() || self.retry_http_errors
    }

    /// Returns `true` if a mutation that has already been retried `retries`
    /// times should be retried after failing with `error`.
    #[must_use]
    pub fn should_retry_mutation(&self, retries: u32, error: &ApiError) -> bool {
        self.mutation_retry && self.should_retry(retries, error)
    }

    /// Delay before retry number `retries + 1`.
    #[must_use]
    pub fn backoff(&self, retries: u32) -> Duration {
        let base = self
            .retry_initial_backoff
            .saturating_mul(1u32.checked_shl(retries).unwrap_or(u32::MAX));
        let capped = base.min(self.retry_max_backoff);

        let jitter_range = u64::try_from(capped.as_millis()).unwrap_or(u64::MAX) / 2;
        if jitter_range > 0 {
            let jitter = rand::rng().random_range(0..=jitter_range);
            capped.saturating_add(Duration::from_millis(jitter)).min(self.retry_max_backoff)
        } else {
            capped
        }
    }

    /// Returns a copy with `options` applied on top.
    #[must_use]
    pub fn with_overrides(&self, options: &QueryOptions) -> Self {
        Self {
            stale_time: options.stale_time.unwrap_or(self.stale_time),
            gc_time: options.gc_time.unwrap_or(self.gc_time),
            max_network_retries: options.max_retries.unwrap_or(self.max_network_retries),
            retry_http_errors: options.retry_http_errors.unwrap_or(self.retry_http_errors),
            ..self.clone()
        }
    }

    /// How long a successful read is served without a network call.
    #[must_use]
    pub fn stale_time(&self) -> Duration {
        self.stale_time
    }

    /// How long an unused entry is kept before eviction.
    #[must_use]
    pub fn gc_time(&self) -> Duration {
        self.gc_time
    }

    /// Retries allowed for a failing read.
    #[must_use]
    pub fn max_network_retries(&self) -> u32 {
        self.max_network_retries
    }

    /// Whether cached reads are invalidated on window focus.
    #[must_use]
    pub fn refetch_on_window_focus(&self) -> bool {
        self.refetch_on_window_focus
    }

    /// When reads may hit the network.
    #[must_use]
    pub fn network_mode(&self) -> NetworkMode {
        self.network_mode
    }

    /// Whether read failures are returned as `Err`.
    #[must_use]
    pub fn throw_on_error(&self) -> bool {
        self.throw_on_error
    }

    /// Whether failing mutations are retried.
    #[must_use]
    pub fn mutation_retry(&self) -> bool {
        self.mutation_retry
    }
}

/// Per-query overrides of the client-wide [`QueryPolicy`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Freshness window.
    pub stale_time: Option<Duration>,
    /// Idle time before eviction.
    pub gc_time: Option<Duration>,
    /// Retries allowed.
    pub max_retries: Option<u32>,
    /// Retry non-network failures (other than 401) too.
    pub retry_http_errors: Option<bool>,
}

impl QueryOptions {
    /// Overrides for the signed-in user's profile: kept fresh for five
    /// minutes, cached for ten, and retried on any failure except a 401.
    pub const CURRENT_USER: Self = Self {
        stale_time: Some(Duration::from_secs(5 * 60)),
        gc_time: Some(Duration::from_secs(10 * 60)),
        max_retries: Some(2),
        retry_http_errors: Some(true),
    };
}
