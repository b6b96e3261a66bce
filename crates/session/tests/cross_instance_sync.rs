//! Cross-instance session synchronization tests.
//!
//! Each test opens two [`SessionStore`]s over sibling handles of one storage
//! area, standing in for two tabs of the same origin, and checks that writes
//! made by one become visible to the other through storage events, with
//! bursts of events coalesced by the throttle.

#![allow(clippy::expect_used, clippy::panic)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use dashboard_client_session::{
    DEFAULT_STORAGE_KEY, FileTokenStorage, MemoryTokenStorage, SessionConfig, SessionState,
    SessionStore, StorageEvents, StorageResult, TokenStorage,
    testutil::{encode_test_token, other_claims, test_claims},
};

const INTERVAL: Duration = Duration::from_millis(300);

/// Storage wrapper that counts reads, i.e. session re-derivations.
struct CountingStorage {
    inner: MemoryTokenStorage,
    reads: Arc<AtomicU32>,
}

impl TokenStorage for CountingStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        self.inner.remove(key)
    }

    fn subscribe(&self) -> StorageEvents {
        self.inner.subscribe()
    }
}

/// Lets the sync tasks drain pending storage events.
async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

fn tab(area: &MemoryTokenStorage) -> SessionStore {
    SessionStore::new(Arc::new(area.handle()), SessionConfig::default())
}

// ============================================================================
// Propagation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_login_in_one_tab_is_seen_by_another() {
    let area = MemoryTokenStorage::new();
    let tab_a = tab(&area);
    let tab_b = tab(&area);
    assert_eq!(tab_b.state(), SessionState::Unauthenticated);

    let token = encode_test_token(&test_claims());
    tab_a.set_token(Some(&token)).expect("valid token");
    settle().await;

    assert_eq!(tab_b.state(), SessionState::Authenticated { claims: test_claims(), token });
}

#[tokio::test(start_paused = true)]
async fn test_logout_in_one_tab_signs_out_another() {
    let area = MemoryTokenStorage::new();
    let tab_a = tab(&area);
    let tab_b = tab(&area);
    tab_a.set_token(Some(&encode_test_token(&test_claims()))).expect("valid token");
    settle().await;
    assert!(tab_b.state().is_authenticated());

    tab_a.logout();
    settle().await;
    tokio::time::advance(INTERVAL).await;
    settle().await;

    assert_eq!(tab_b.state(), SessionState::Unauthenticated);
}

#[tokio::test(start_paused = true)]
async fn test_account_switch_notifies_other_tab() {
    let area = MemoryTokenStorage::new();
    let tab_a = tab(&area);
    let tab_b = tab(&area);
    let _ = tab_b.state();
    let notifications = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&notifications);
    let _subscription = tab_b.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    tab_a.set_token(Some(&encode_test_token(&test_claims()))).expect("valid token");
    settle().await;
    tokio::time::advance(INTERVAL).await;
    tab_a.set_token(Some(&encode_test_token(&other_claims()))).expect("valid token");
    settle().await;

    assert_eq!(notifications.load(Ordering::SeqCst), 2);
    let state = tab_b.state();
    assert_eq!(state.claims().map(|c| c.subject_id.as_str()), Some("usr_02ABCD"));
}

#[tokio::test(start_paused = true)]
async fn test_malformed_token_from_other_writer_downgrades() {
    let area = MemoryTokenStorage::new();
    let tab_b = tab(&area);
    let writer = area.handle();
    writer.set(DEFAULT_STORAGE_KEY, &encode_test_token(&test_claims())).expect("set");
    assert!(tab_b.state().is_authenticated());
    settle().await;

    tokio::time::advance(INTERVAL).await;
    writer.set(DEFAULT_STORAGE_KEY, "definitely-not-a-jwt").expect("set");
    settle().await;

    assert_eq!(tab_b.state(), SessionState::Unauthenticated);
}

// ============================================================================
// Throttling
// ============================================================================

/// N events inside the window cost one immediate and one trailing re-read.
#[tokio::test(start_paused = true)]
async fn test_event_burst_collapses_into_one_trailing_rederivation() {
    let area = MemoryTokenStorage::new();
    let reads = Arc::new(AtomicU32::new(0));
    let storage = CountingStorage { inner: area.handle(), reads: Arc::clone(&reads) };
    let store = SessionStore::new(Arc::new(storage), SessionConfig::default());
    let _ = store.state();
    assert_eq!(reads.load(Ordering::SeqCst), 1);

    let writer = area.handle();
    let last = encode_test_token(&other_claims());
    for _ in 0..10 {
        writer.set(DEFAULT_STORAGE_KEY, &encode_test_token(&test_claims())).expect("set");
    }
    writer.set(DEFAULT_STORAGE_KEY, &last).expect("set");
    settle().await;
    assert_eq!(reads.load(Ordering::SeqCst), 2, "leading re-derivation only");

    tokio::time::advance(INTERVAL).await;
    settle().await;
    assert_eq!(reads.load(Ordering::SeqCst), 3, "exactly one trailing re-derivation");
    assert_eq!(store.token(), Some(last));

    tokio::time::advance(INTERVAL * 3).await;
    settle().await;
    assert_eq!(reads.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_events_for_other_keys_do_not_rederive() {
    let area = MemoryTokenStorage::new();
    let reads = Arc::new(AtomicU32::new(0));
    let storage = CountingStorage { inner: area.handle(), reads: Arc::clone(&reads) };
    let store = SessionStore::new(Arc::new(storage), SessionConfig::default());
    let _ = store.state();

    let writer = area.handle();
    writer.set("theme", "dark").expect("set");
    writer.set("locale", "en").expect("set");
    settle().await;

    assert_eq!(reads.load(Ordering::SeqCst), 1);
}

// ============================================================================
// File-backed storage
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_file_storage_syncs_sibling_handles() {
    let dir = tempfile::tempdir().expect("tempdir");
    let area = FileTokenStorage::open(dir.path()).expect("open");
    let tab_a = SessionStore::new(Arc::new(area.handle()), SessionConfig::default());
    let tab_b = SessionStore::new(Arc::new(area.handle()), SessionConfig::default());
    let _ = tab_b.state();

    tab_a.set_token(Some(&encode_test_token(&test_claims()))).expect("valid token");
    settle().await;
    assert!(tab_b.state().is_authenticated());

    // A new process over the same directory resolves the persisted token.
    let reopened = FileTokenStorage::open(dir.path()).expect("reopen");
    let fresh = SessionStore::new(Arc::new(reopened), SessionConfig::default());
    assert_eq!(fresh.state().claims(), Some(&test_claims()));
}
