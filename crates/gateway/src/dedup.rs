//! In-flight request deduplication.
//!
//! [`Deduplicator`] folds concurrent calls that share a key into one
//! execution. The first caller for a key runs the producer; every caller
//! that arrives while it is still pending awaits the same shared future and
//! receives a clone of its output. Nothing is retained after the call
//! settles: this is not a cache.
//!
//! # Entry Lifecycle
//!
//! ```text
//! dedupe(k) ──→ registry has live k? ──yes──→ join shared future
//!                      │ no
//!                      ↓
//!               insert (k, id) ──→ run producer ──→ settle ──→ remove (k, id)
//!                                        │
//!                              all callers dropped ──→ remove (k, id)
//! ```
//!
//! Every entry carries a guard that removes it when the underlying future
//! completes or is dropped, so an abandoned call never blocks later callers
//! and the registry never outgrows the set of calls in flight.

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::{
    FutureExt,
    future::{BoxFuture, Shared, WeakShared},
};
use parking_lot::Mutex;

type SharedCall<T> = Shared<BoxFuture<'static, T>>;

struct Entry<T> {
    id: u64,
    call: WeakShared<BoxFuture<'static, T>>,
}

type Registry<T> = Arc<Mutex<HashMap<String, Entry<T>>>>;

/// Removes its registry entry when dropped, unless a newer entry has
/// replaced it.
struct EntryGuard<T> {
    registry: Registry<T>,
    key: String,
    id: u64,
}

impl<T> Drop for EntryGuard<T> {
    fn drop(&mut self) {
        let mut registry = self.registry.lock();
        if registry.get(&self.key).is_some_and(|entry| entry.id == self.id) {
            registry.remove(&self.key);
        }
    }
}

/// Keyed registry of in-flight calls.
///
/// Cheaply cloneable; clones share the registry.
pub struct Deduplicator<T> {
    registry: Registry<T>,
    next_id: Arc<AtomicU64>,
    joined: Arc<AtomicU64>,
}

impl<T> Clone for Deduplicator<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            next_id: Arc::clone(&self.next_id),
            joined: Arc::clone(&self.joined),
        }
    }
}

impl<T> std::fmt::Debug for Deduplicator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deduplicator")
            .field("in_flight", &self.in_flight())
            .field("joined", &self.joined_count())
            .finish()
    }
}

impl<T> Default for Deduplicator<T> {
    fn default() -> Self {
        Self {
            registry: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
            joined: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl<T> Deduplicator<T> {
    /// Number of calls currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.registry.lock().len()
    }

    /// Number of callers that joined an existing call instead of starting one.
    #[must_use]
    pub fn joined_count(&self) -> u64 {
        self.joined.load(Ordering::Relaxed)
    }
}

impl<T> Deduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `produce` unless a call for `key` is already in flight, in which
    /// case the pending call's output is awaited instead.
    ///
    /// `produce` is invoked while the registry lock is held and must only
    /// construct the future, not do work.
    pub async fn dedupe<F, Fut>(&self, key: impl Into<String>, produce: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let key = key.into();
        let call = {
            let mut registry = self.registry.lock();
            match registry.get(&key).and_then(|entry| entry.call.upgrade()) {
                Some(call) => {
                    self.joined.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(key = %key, "joined in-flight request");
                    call
                },
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let call = self.start(key.clone(), id, produce());
                    if let Some(weak) = call.downgrade() {
                        registry.insert(key, Entry { id, call: weak });
                    }
                    call
                },
            }
        };
        call.await
    }

    fn start<Fut>(&self, key: String, id: u64, future: Fut) -> SharedCall<T>
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        let guard = EntryGuard { registry: Arc::clone(&self.registry), key, id };
        async move {
            let _guard = guard;
            future.await
        }
        .boxed()
        .shared()
    }

}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use tokio::sync::oneshot;

    use super::*;

    fn counting_producer(
        calls: &Arc<AtomicU32>,
        release: oneshot::Receiver<u32>,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<u32, String>> {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { release.await.map_err(|e| e.to_string()) }.boxed()
        }
    }

    #[tokio::test]
    async fn test_concurrent_identical_keys_share_one_call() {
        let dedup = Deduplicator::<Result<u32, String>>::new();
        let calls = Arc::new(AtomicU32::new(0));
        let (tx, rx) = oneshot::channel();
        let (_unused_tx, unused_rx) = oneshot::channel();

        let first = dedup.dedupe("GET:/contacts:", counting_producer(&calls, rx));
        let second = dedup.dedupe("GET:/contacts:", counting_producer(&calls, unused_rx));
        let pending = async {
            tokio::task::yield_now().await;
            assert_eq!(dedup.in_flight(), 1);
            tx.send(7).unwrap();
        };

        let (a, b, ()) = tokio::join!(first, second, pending);
        assert_eq!(a, Ok(7));
        assert_eq!(b, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dedup.joined_count(), 1);
        assert_eq!(dedup.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failure_is_shared_and_entry_removed() {
        let dedup = Deduplicator::<Result<u32, String>>::new();
        let calls = Arc::new(AtomicU32::new(0));
        let (tx, rx) = oneshot::channel::<u32>();
        let (_unused_tx, unused_rx) = oneshot::channel();

        let first = dedup.dedupe("k", counting_producer(&calls, rx));
        let second = dedup.dedupe("k", counting_producer(&calls, unused_rx));
        let fail = async {
            tokio::task::yield_now().await;
            drop(tx);
        };

        let (a, b, ()) = tokio::join!(first, second, fail);
        assert!(a.is_err());
        assert_eq!(a, b);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dedup.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_run_separately() {
        let dedup = Deduplicator::<u32>::new();

        let (a, b) = tokio::join!(
            dedup.dedupe("a", || async { 1 }),
            dedup.dedupe("b", || async { 2 })
        );

        assert_eq!((a, b), (1, 2));
        assert_eq!(dedup.joined_count(), 0);
    }

    #[tokio::test]
    async fn test_settled_key_starts_a_fresh_call() {
        let dedup = Deduplicator::<u32>::new();
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            dedup
                .dedupe("k", move || async move { calls.fetch_add(1, Ordering::SeqCst) })
                .await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_abandoned_call_is_removed() {
        let dedup = Deduplicator::<Result<u32, String>>::new();
        let calls = Arc::new(AtomicU32::new(0));
        let (_tx, rx) = oneshot::channel();

        {
            let mut call = Box::pin(dedup.dedupe("k", counting_producer(&calls, rx)));
            assert!(futures::poll!(call.as_mut()).is_pending());
            assert_eq!(dedup.in_flight(), 1);
        }

        assert_eq!(dedup.in_flight(), 0);
        let (tx, rx) = oneshot::channel();
        tx.send(3).unwrap();
        assert_eq!(dedup.dedupe("k", counting_producer(&calls, rx)).await, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_debug_reports_counters() {
        let dedup = Deduplicator::<Result<u32, String>>::new();
        let calls = Arc::new(AtomicU32::new(0));
        let (_tx, rx) = oneshot::channel();

        let mut call = Box::pin(dedup.dedupe("k", counting_producer(&calls, rx)));
        assert!(futures::poll!(call.as_mut()).is_pending());

        assert_eq!(format!("{dedup:?}"), "Deduplicator { in_flight: 1, joined: 0 }");
        drop(call);
        assert_eq!(format!("{dedup:?}"), "Deduplicator { in_flight: 0, joined: 0 }");
    }
}
