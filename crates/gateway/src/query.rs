//! Query cache honouring a [`QueryPolicy`].
//!
//! [`QueryClient`] is the collaborator the rendering layer talks to. Given a
//! logical query key and a producer (normally a [`Gateway`](crate::Gateway)
//! call), it serves fresh data from cache, retries failing reads with
//! backoff, and reports failures through [`QueryResult::error`] instead of
//! returning them.
//!
//! # Entry Lifetime
//!
//! ```text
//! fetched ──→ fresh (age < stale_time) ──→ stale ──→ evicted (idle > gc_time)
//!               served from cache          refetched on next read
//! ```
//!
//! Freshness is measured on the Tokio clock. Eviction is handled by a
//! [`moka::future::Cache`] with a per-entry idle deadline, so every query
//! can carry its own `gc_time`.

use std::{
    any::Any,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use moka::{future::Cache, policy::EvictionPolicy};
use tokio::time::Instant;

use crate::{
    error::{ApiError, ApiErrorKind},
    metrics::{QueryMetrics, QueryMetricsSnapshot},
    notify::{Notification, Notifier},
    policy::{NetworkMode, QueryOptions, QueryPolicy},
};

/// Default upper bound on cached queries.
pub const DEFAULT_QUERY_CACHE_CAPACITY: u64 = 1_000;

#[derive(Clone)]
struct CachedQuery {
    data: Arc<dyn Any + Send + Sync>,
    fetched_at: Instant,
    gc_time: Duration,
}

impl CachedQuery {
    fn value<T: Clone + 'static>(&self) -> Option<T> {
        self.data.downcast_ref::<T>().cloned()
    }
}

/// Resets an entry's idle deadline to its own `gc_time` on every access.
struct IdleExpiry;

impl moka::Expiry<String, CachedQuery> for IdleExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedQuery,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(value.gc_time)
    }

    fn expire_after_read(
        &self,
        _key: &String,
        value: &CachedQuery,
        _read_at: std::time::Instant,
        _duration_until_expiry: Option<Duration>,
        _last_modified_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(value.gc_time)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedQuery,
        _updated_at: std::time::Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.gc_time)
    }
}

/// How a [`QueryResult`] settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryStatus {
    /// The producer succeeded or fresh data was served from cache.
    Success,
    /// The producer failed after all allowed retries.
    Error,
    /// The client is offline; the producer was not called.
    Paused,
}

/// Outcome of [`QueryClient::fetch_query`].
#[derive(Debug, Clone)]
pub struct QueryResult<T> {
    /// Latest data: fresh on success, the last cached value otherwise.
    pub data: Option<T>,
    /// The failure, when `status` is [`QueryStatus::Error`].
    pub error: Option<ApiError>,
    /// How the query settled.
    pub status: QueryStatus,
    /// `true` if `data` came from the cache rather than this fetch.
    pub from_cache: bool,
}

impl<T> QueryResult<T> {
    /// Returns `true` if the query settled successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    /// Converts into a `Result`, discarding stale data on error.
    ///
    /// # Errors
    ///
    /// Returns the query's error, or a [`Network`](ApiErrorKind::Network)
    /// error if the query paused without data.
    pub fn into_result(self) -> Result<T, ApiError> {
        match (self.data, self.error) {
            (_, Some(err)) => Err(err),
            (Some(data), None) => Ok(data),
            (None, None) => Err(ApiError::offline()),
        }
    }
}

struct Inner {
    policy: QueryPolicy,
    cache: Cache<String, CachedQuery>,
    online: AtomicBool,
    metrics: QueryMetrics,
}

/// Keyed query cache with retry and freshness policy.
///
/// Cheaply cloneable; clones share the cache.
#[derive(Clone)]
pub struct QueryClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryClient")
            .field("policy", &self.inner.policy)
            .field("entries", &self.inner.cache.entry_count())
            .field("online", &self.is_online())
            .finish()
    }
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new(QueryPolicy::default())
    }
}

impl QueryClient {
    /// Creates a client with [`DEFAULT_QUERY_CACHE_CAPACITY`].
    #[must_use]
    pub fn new(policy: QueryPolicy) -> Self {
        Self::with_capacity(policy, DEFAULT_QUERY_CACHE_CAPACITY)
    }

    /// Creates a client holding at most `max_capacity` queries; the least
    /// recently used are evicted first.
    #[must_use]
    pub fn with_capacity(policy: QueryPolicy, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(IdleExpiry)
            .build();
        Self {
            inner: Arc::new(Inner {
                policy,
                cache,
                online: AtomicBool::new(true),
                metrics: QueryMetrics::default(),
            }),
        }
    }

    /// Reads `key`, calling `producer` unless fresh data is cached.
    ///
    /// `producer` is called again for each retry.
    ///
    /// # Errors
    ///
    /// Only when the policy enables `throw_on_error`; otherwise failures are
    /// reported in [`QueryResult::error`].
    #[tracing::instrument(name = "query.fetch", skip_all, fields(key = key.as_ref()))]
    pub async fn fetch_query<T, F, Fut>(
        &self,
        key: impl AsRef<str>,
        options: &QueryOptions,
        producer: F,
    ) -> Result<QueryResult<T>, ApiError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let key = key.as_ref();
        let policy = self.inner.policy.with_overrides(options);
        let cached = self.inner.cache.get(key).await;
        let stale = cached.as_ref().and_then(CachedQuery::value::<T>);

        if let Some(entry) = &cached
            && let Some(data) = &stale
            && entry.fetched_at.elapsed() < policy.stale_time()
        {
            self.inner.metrics.record_hit();
            tracing::trace!("fresh cache hit");
            return Ok(QueryResult {
                data: Some(data.clone()),
                error: None,
                status: QueryStatus::Success,
                from_cache: true,
            });
        }

        if policy.network_mode() == NetworkMode::Online && !self.is_online() {
            self.inner.metrics.record_paused();
            tracing::debug!("offline; query paused");
            return Ok(QueryResult {
                from_cache: stale.is_some(),
                data: stale,
                error: None,
                status: QueryStatus::Paused,
            });
        }

        self.inner.metrics.record_miss();
        match self.run(&policy, key, false, producer).await {
            Ok(data) => {
                let entry = CachedQuery {
                    data: Arc::new(data.clone()),
                    fetched_at: Instant::now(),
                    gc_time: policy.gc_time(),
                };
                self.inner.cache.insert(key.to_owned(), entry).await;
                Ok(QueryResult {
                    data: Some(data),
                    error: None,
                    status: QueryStatus::Success,
                    from_cache: false,
                })
            },
            Err(err) => {
                self.inner.metrics.record_failure();
                if policy.throw_on_error() {
                    return Err(err);
                }
                Ok(QueryResult {
                    from_cache: stale.is_some(),
                    data: stale,
                    error: Some(err),
                    status: QueryStatus::Error,
                })
            },
        }
    }

    /// Runs a write.
    ///
    /// Mutations are not retried unless the policy enables `mutation_retry`.
    /// A rate-limited failure raises exactly one notification through
    /// `notifier`; every other failure is left to the caller.
    ///
    /// # Errors
    ///
    /// Returns the producer's final error.
    #[tracing::instrument(name = "query.mutate", skip_all)]
    pub async fn execute_mutation<T, F, Fut>(
        &self,
        notifier: &dyn Notifier,
        producer: F,
    ) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let result = self.run(&self.inner.policy, "mutation", true, producer).await;
        if let Err(err) = &result {
            self.inner.metrics.record_failure();
            if err.kind() == ApiErrorKind::RateLimited {
                notifier.notify(Notification::rate_limited());
            }
        }
        result
    }

    async fn run<T, F, Fut>(
        &self,
        policy: &QueryPolicy,
        key: &str,
        mutation: bool,
        mut producer: F,
    ) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut retries = 0;
        loop {
            match producer().await {
                Ok(value) => {
                    if retries > 0 {
                        tracing::debug!(key, retries, "query succeeded after retry");
                    }
                    return Ok(value);
                },
                Err(err) => {
                    let retry = if mutation {
                        policy.should_retry_mutation(retries, &err)
                    } else {
                        policy.should_retry(retries, &err)
                    };
                    if !retry {
                        if retries > 0 {
                            tracing::debug!(key, retries, error = %err, "query retries exhausted");
                        }
                        return Err(err);
                    }

                    let delay = policy.backoff(retries);
                    self.inner.metrics.record_retry();
                    tracing::debug!(
                        key,
                        attempt = retries + 2,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "query failed; retrying",
                    );
                    tokio::time::sleep(delay).await;
                    retries += 1;
                },
            }
        }
    }

    /// Returns the cached data for `key` regardless of freshness.
    pub async fn cached<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        self.inner.cache.get(key).await.and_then(|entry| entry.value::<T>())
    }

    /// Drops the cached entry for `key`; the next read refetches.
    pub async fn invalidate(&self, key: &str) {
        self.inner.cache.invalidate(key).await;
    }

    /// Drops every cached entry.
    pub fn clear(&self) {
        self.inner.cache.invalidate_all();
    }

    /// Records connectivity. While offline, reads in
    /// [`NetworkMode::Online`] are paused.
    pub fn set_online(&self, online: bool) {
        if self.inner.online.swap(online, Ordering::Relaxed) != online {
            tracing::info!(online, "connectivity changed");
        }
    }

    /// Returns the last recorded connectivity.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::Relaxed)
    }

    /// Handles the window regaining focus. Returns `true` if cached reads
    /// were invalidated, which only happens when the policy enables
    /// `refetch_on_window_focus`.
    pub fn notify_window_focus(&self) -> bool {
        if !self.inner.policy.refetch_on_window_focus() {
            return false;
        }
        tracing::debug!("window focused; invalidating queries");
        self.clear();
        true
    }

    /// The client-wide policy.
    #[must_use]
    pub fn policy(&self) -> &QueryPolicy {
        &self.inner.policy
    }

    /// Current counters.
    #[must_use]
    pub fn metrics(&self) -> QueryMetricsSnapshot {
        self.inner.metrics.snapshot()
    }
}
