//! Shared test utilities for gateway consumers.
//!
//! Provides a scripted [`MockTransport`] and a [`RecordingNotifier`] so that
//! tests can drive the gateway and query layer without a server.

use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use dashboard_client_session::{MemoryTokenStorage, SessionConfig, SessionStore, testutil};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::{
    error::TransportError,
    notify::{Notification, Notifier},
    transport::{HttpRequest, HttpResponse, Transport},
};

type Scripted = Result<HttpResponse, TransportError>;

/// [`Transport`] that replays scripted outcomes in order.
///
/// Every request is recorded before it is answered. A gated transport holds
/// each call until a permit is [`release`](MockTransport::release)d, which
/// keeps requests in flight for deduplication and timeout tests. When the
/// script is empty the fallback is replayed, or a connect error returned.
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Mutex<Option<Scripted>>,
    requests: Mutex<Vec<HttpRequest>>,
    gate: Option<Semaphore>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("scripted", &self.script.lock().len())
            .field("calls", &self.calls())
            .field("gated", &self.gate.is_some())
            .finish()
    }
}

impl MockTransport {
    /// Creates an ungated transport with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport whose calls wait for [`release`](Self::release).
    #[must_use]
    pub fn gated() -> Self {
        Self { gate: Some(Semaphore::new(0)), ..Self::default() }
    }

    /// Lets `n` held calls proceed.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Queues a JSON response.
    pub fn push_json(&self, status: u16, body: Value) {
        self.push_response(HttpResponse::json(status, &body));
    }

    /// Queues a response.
    pub fn push_response(&self, response: HttpResponse) {
        self.script.lock().push_back(Ok(response));
    }

    /// Queues a transport failure.
    pub fn push_error(&self, error: TransportError) {
        self.script.lock().push_back(Err(error));
    }

    /// Sets the outcome replayed once the script is exhausted.
    pub fn set_fallback(&self, outcome: Result<HttpResponse, TransportError>) {
        *self.fallback.lock() = Some(outcome);
    }

    /// Number of calls received.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    /// Every request received, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// The most recent request.
    #[must_use]
    pub fn last_request(&self) -> Option<HttpRequest> {
        self.requests.lock().last().cloned()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(request);

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| TransportError::connect("mock transport gate closed"))?
                .forget();
        }

        let next = self.script.lock().pop_front();
        match next {
            Some(outcome) => outcome,
            None => self
                .fallback
                .lock()
                .clone()
                .unwrap_or_else(|| Err(TransportError::connect("no scripted response"))),
        }
    }
}

/// [`Notifier`] that records every notification.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    seen: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications received, in order.
    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.seen.lock().clone()
    }

    /// Number of notifications received.
    #[must_use]
    pub fn count(&self) -> usize {
        self.seen.lock().len()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.seen.lock().push(notification);
    }
}

/// A session store over fresh in-memory storage.
#[must_use]
pub fn signed_out_session() -> SessionStore {
    SessionStore::new(Arc::new(MemoryTokenStorage::new()), SessionConfig::default())
}

/// A session store signed in with [`testutil::test_claims`]; returns the
/// token too.
#[must_use]
pub fn signed_in_session() -> (SessionStore, String) {
    let session = signed_out_session();
    let token = testutil::encode_test_token(&testutil::test_claims());
    session.set_token(Some(&token)).expect("test token must be accepted");
    (session, token)
}
