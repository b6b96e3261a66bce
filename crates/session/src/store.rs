//! Process-wide session state.
//!
//! [`SessionStore`] is the single owner of the persisted token and of the
//! derived [`SessionState`]. Everything else reads it; only its own methods
//! write it.
//!
//! # Transitions
//!
//! ```text
//!            first read            set_token(valid)
//! Unknown ──────────────→ ┌─────────────────┐ ──────────────→ Authenticated
//!                         │ Unauthenticated │ ←────────────── (logout, 401,
//!                         └─────────────────┘                 clear, bad token)
//! ```
//!
//! Transitions are synchronous: once [`state`](SessionStore::state) returns
//! the new value, every later reader sees it. Subscriber notification is
//! asynchronous and only fires when the new state is observably different
//! (see [`SessionState::differs_from`]).
//!
//! # Cross-instance sync
//!
//! The store listens to [`StorageEvent`]s for its key from other handles of
//! the same storage area and re-derives its state from storage. Bursts of
//! events go through a [`Throttle`], so N events inside the throttle window
//! cost one immediate and one trailing re-derivation.

use std::sync::{
    Arc, Weak,
    atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    config::SessionConfig,
    error::TokenError,
    state::SessionState,
    storage::{StorageEvent, TokenStorage},
    throttle::{Throttle, TriggerOutcome},
    token::decode_validated,
};

/// Handle returned by [`SessionStore::subscribe`].
///
/// The listener stays registered until this handle is dropped or
/// [`unsubscribe`](Self::unsubscribe) is called.
#[derive(Debug)]
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    /// Stops delivering notifications to the listener.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Inner {
    config: SessionConfig,
    storage: Arc<dyn TokenStorage>,
    state: watch::Sender<SessionState>,
    /// Serializes every write of the persisted token and the state.
    mutation: Mutex<()>,
    /// Bumped by every forced logout so that a decode racing with it
    /// cannot resurrect the session.
    logout_generation: AtomicU64,
    throttle: Throttle,
    sync_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.sync_task.lock().take() {
            task.abort();
        }
    }
}

/// Owner of the persisted session token and the derived [`SessionState`].
///
/// Cheaply cloneable; all clones share the same state.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("storage_key", &self.inner.config.storage_key())
            .field("state", &self.inner.state.borrow().tag())
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Creates a store over `storage`.
    ///
    /// The state starts as [`SessionState::Unknown`] and is resolved from
    /// storage on first access. When called inside a Tokio runtime, a
    /// background task starts listening for changes made by other storage
    /// handles; it stops when the last clone of the store is dropped.
    pub fn new(storage: Arc<dyn TokenStorage>, config: SessionConfig) -> Self {
        let (state, _) = watch::channel(SessionState::Unknown);
        let interval = config.throttle_interval();
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let weak = weak.clone();
            Inner {
                config,
                storage,
                state,
                mutation: Mutex::new(()),
                logout_generation: AtomicU64::new(0),
                throttle: Throttle::new(interval, move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.rederive();
                    }
                }),
                sync_task: Mutex::new(None),
            }
        });

        let store = Self { inner };
        if tokio::runtime::Handle::try_current().is_ok() {
            store.spawn_sync_listener();
        } else {
            tracing::debug!("no runtime available; cross-instance session sync disabled");
        }
        store
    }

    /// Starts (or restarts) the task that re-derives the state when other
    /// storage handles write the session key.
    ///
    /// [`new`](Self::new) calls this automatically inside a runtime. The task
    /// stops when the last clone of the store is dropped.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn_sync_listener(&self) {
        // Subscribe before spawning so no event between now and the first
        // poll is lost.
        let mut events = self.inner.storage.subscribe();
        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                inner.on_storage_event(&event);
            }
        });
        if let Some(previous) = self.inner.sync_task.lock().replace(task) {
            previous.abort();
        }
    }

    /// Current session state.
    ///
    /// The first call resolves [`SessionState::Unknown`] from storage.
    #[must_use]
    pub fn state(&self) -> SessionState {
        {
            let current = self.inner.state.borrow();
            if !current.is_unknown() {
                return current.clone();
            }
        }
        let _guard = self.inner.mutation.lock();
        if self.inner.state.borrow().is_unknown() {
            let derived = self.inner.derive_from_storage();
            self.inner.transition(derived);
        }
        self.inner.state.borrow().clone()
    }

    /// Current bearer token, if authenticated.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.state().token().map(str::to_owned)
    }

    /// Replaces or clears the session token and returns the resulting state.
    ///
    /// A `Some` token is decoded first. If decoding fails, nothing is
    /// persisted, any previously stored token is removed, and the state
    /// becomes [`SessionState::Unauthenticated`]. `None` clears storage.
    ///
    /// Storage failures are logged and degrade the session to
    /// unauthenticated with storage cleared; they are not errors, so callers
    /// that need a session must check the returned state. The same holds
    /// when a concurrent [`logout`](Self::logout) supersedes the update.
    ///
    /// # Errors
    ///
    /// Returns the [`TokenError`] when a supplied token cannot be decoded.
    #[tracing::instrument(skip_all, fields(clear = token.is_none()))]
    pub fn set_token(&self, token: Option<&str>) -> Result<SessionState, TokenError> {
        match token {
            Some(raw) => self.store_token(raw, || {}),
            None => {
                let _guard = self.inner.mutation.lock();
                self.inner.clear_persisted();
                self.inner.transition(SessionState::Unauthenticated);
                Ok(SessionState::Unauthenticated)
            },
        }
    }

    /// Decodes and persists `raw`. `decoded` runs after decoding and before
    /// the write lock is taken.
    fn store_token(&self, raw: &str, decoded: impl FnOnce()) -> Result<SessionState, TokenError> {
        let generation = self.inner.logout_generation.load(Ordering::Acquire);
        let claims = decode_validated(raw, self.inner.config.reject_expired());
        decoded();

        let _guard = self.inner.mutation.lock();
        let claims = match claims {
            Ok(claims) => claims,
            Err(err) => {
                tracing::warn!(error = %err, "refusing to store invalid session token");
                self.inner.clear_persisted();
                self.inner.transition(SessionState::Unauthenticated);
                return Err(err);
            },
        };

        if self.inner.logout_generation.load(Ordering::Acquire) != generation {
            tracing::debug!("token update superseded by a concurrent logout");
            return Ok(self.inner.state.borrow().clone());
        }

        if let Err(err) = self.inner.storage.set(self.inner.config.storage_key(), raw) {
            tracing::warn!(error = %err, "failed to persist session token");
            self.inner.clear_persisted();
            self.inner.transition(SessionState::Unauthenticated);
            return Ok(SessionState::Unauthenticated);
        }

        tracing::info!(subject_id = %claims.subject_id, "session established");
        let state = SessionState::Authenticated { claims, token: raw.to_owned() };
        self.inner.transition(state.clone());
        Ok(state)
    }

    /// Ends the session.
    ///
    /// Unlike `set_token(None)`, this also invalidates any `set_token` call
    /// that is still decoding, so the store ends up unauthenticated no
    /// matter how the two interleave.
    pub fn logout(&self) {
        self.force_unauthenticated("logout");
    }

    /// Ends the session after the API rejected the credential (HTTP 401).
    pub fn handle_unauthorized(&self) {
        self.force_unauthenticated("credential rejected by server");
    }

    fn force_unauthenticated(&self, reason: &'static str) {
        self.inner.logout_generation.fetch_add(1, Ordering::AcqRel);
        let _guard = self.inner.mutation.lock();
        self.inner.clear_persisted();
        if self.inner.state.borrow().is_authenticated() {
            tracing::info!(reason, "session ended");
        }
        self.inner.transition(SessionState::Unauthenticated);
    }

    /// Registers `listener` for state changes.
    ///
    /// The listener runs on a spawned task, after the transition is already
    /// visible through [`state`](Self::state). Must be called inside a Tokio
    /// runtime.
    pub fn subscribe(
        &self,
        listener: impl Fn(&SessionState) + Send + Sync + 'static,
    ) -> Subscription {
        let mut receiver = self.inner.state.subscribe();
        let task = tokio::spawn(async move {
            while receiver.changed().await.is_ok() {
                let state = receiver.borrow_and_update().clone();
                listener(&state);
            }
        });
        Subscription { task }
    }

    /// A watch receiver over the session state.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Feeds a storage event delivered by the host.
    ///
    /// Events for other keys are ignored. Returns the throttle outcome when
    /// the event was relevant.
    pub fn notify_storage_event(&self, event: &StorageEvent) -> Option<TriggerOutcome> {
        self.inner.on_storage_event(event)
    }

    /// Re-reads storage immediately, bypassing the throttle.
    pub fn refresh(&self) {
        self.inner.rederive();
    }

    /// The configuration this store was created with.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }
}

impl Inner {
    fn on_storage_event(&self, event: &StorageEvent) -> Option<TriggerOutcome> {
        if !event.concerns(self.config.storage_key()) {
            return None;
        }
        let outcome = self.throttle.trigger();
        tracing::debug!(?outcome, "storage event for session key");
        Some(outcome)
    }

    fn rederive(&self) {
        let _guard = self.mutation.lock();
        let derived = self.derive_from_storage();
        self.transition(derived);
    }

    fn derive_from_storage(&self) -> SessionState {
        let raw = match self.storage.get(self.config.storage_key()) {
            Ok(Some(raw)) => raw,
            Ok(None) => return SessionState::Unauthenticated,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    "failed to read session token; treating as signed out"
                );
                return SessionState::Unauthenticated;
            },
        };

        match decode_validated(&raw, self.config.reject_expired()) {
            Ok(claims) => SessionState::Authenticated { claims, token: raw },
            Err(err) => {
                tracing::warn!(error = %err, "persisted session token is invalid");
                SessionState::Unauthenticated
            },
        }
    }

    fn clear_persisted(&self) {
        if let Err(err) = self.storage.remove(self.config.storage_key()) {
            tracing::warn!(error = %err, "failed to clear persisted session token");
        }
    }

    /// The only place the state is written. Callers hold `mutation`.
    fn transition(&self, next: SessionState) {
        self.state.send_if_modified(|current| {
            if current.differs_from(&next) {
                tracing::debug!(from = current.tag(), to = next.tag(), "session state changed");
                *current = next;
                true
            } else {
                false
            }
        });
    }
}
