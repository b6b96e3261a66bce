//! Gateway and query-cache counters.
//!
//! All counters are independent, monotonically increasing `AtomicU64`s
//! updated with `Ordering::Relaxed`. A [`snapshot`](GatewayMetrics::snapshot)
//! reads them one by one, so counters may be slightly out of step with each
//! other under concurrent traffic.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of [`GatewayMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayMetricsSnapshot {
    /// Calls to [`Gateway::request`](crate::Gateway::request).
    pub requests: u64,
    /// Requests actually handed to the transport.
    pub network_calls: u64,
    /// Requests that joined an identical in-flight call.
    pub deduplicated: u64,
    /// 429 responses.
    pub rate_limited: u64,
    /// 401 responses on private routes.
    pub session_expired: u64,
    /// Calls that obtained no response.
    pub network_errors: u64,
    /// Other non-success responses.
    pub http_errors: u64,
}

/// Lock-free gateway counters.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    requests: AtomicU64,
    network_calls: AtomicU64,
    rate_limited: AtomicU64,
    session_expired: AtomicU64,
    network_errors: AtomicU64,
    http_errors: AtomicU64,
}

impl GatewayMetrics {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_network_call(&self) {
        self.network_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_session_expired(&self) {
        self.session_expired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_network_error(&self) {
        self.network_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_http_error(&self) {
        self.http_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads every counter. `deduplicated` is owned by the deduplicator and
    /// supplied by the caller.
    #[must_use]
    pub fn snapshot(&self, deduplicated: u64) -> GatewayMetricsSnapshot {
        GatewayMetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            network_calls: self.network_calls.load(Ordering::Relaxed),
            deduplicated,
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            session_expired: self.session_expired.load(Ordering::Relaxed),
            network_errors: self.network_errors.load(Ordering::Relaxed),
            http_errors: self.http_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`QueryMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryMetricsSnapshot {
    /// Reads served from a fresh cache entry.
    pub hits: u64,
    /// Reads that ran the producer.
    pub misses: u64,
    /// Retries performed across reads and mutations.
    pub retries: u64,
    /// Reads and mutations that settled with an error.
    pub failures: u64,
    /// Reads paused because the client was offline.
    pub paused: u64,
}

/// Lock-free query-cache counters.
#[derive(Debug, Default)]
pub struct QueryMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
    paused: AtomicU64,
}

impl QueryMetrics {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_paused(&self) {
        self.paused.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads every counter.
    #[must_use]
    pub fn snapshot(&self) -> QueryMetricsSnapshot {
        QueryMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            paused: self.paused.load(Ordering::Relaxed),
        }
    }
}
