//! End-to-end request scenarios.
//!
//! Drives the gateway, the query client and the session store together over
//! a scripted transport: short-circuiting without a session, deduplication
//! of concurrent identical calls, session expiry, rate limiting and retried
//! reads.

#![allow(clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use dashboard_client_gateway::{
    ApiErrorKind, Gateway, GatewayConfig, Notification, QueryClient, QueryOptions, QueryStatus,
    RequestDescriptor, Transport, TransportError,
    testutil::{MockTransport, RecordingNotifier},
};
use dashboard_client_session::{
    DEFAULT_STORAGE_KEY, MemoryTokenStorage, SessionConfig, SessionStore, TokenStorage,
    testutil::{encode_test_token, test_claims},
};
use proptest::prelude::*;
use serde_json::json;

fn config() -> GatewayConfig {
    GatewayConfig::builder().api_url("https://api.example.com").build().expect("valid config")
}

fn gateway(session: SessionStore, transport: &Arc<MockTransport>) -> Gateway {
    Gateway::new(config(), session, Arc::clone(transport) as Arc<dyn Transport>)
}

/// A signed-in session plus a second handle on its storage area.
fn signed_in() -> (SessionStore, MemoryTokenStorage) {
    let area = MemoryTokenStorage::new();
    let session = SessionStore::new(Arc::new(area.handle()), SessionConfig::default());
    session.set_token(Some(&encode_test_token(&test_claims()))).expect("valid token");
    (session, area)
}

fn signed_out() -> SessionStore {
    SessionStore::new(Arc::new(MemoryTokenStorage::new()), SessionConfig::default())
}

/// Lets every spawned future reach its next suspension point.
async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn private_request_without_session_is_not_sent() {
    let transport = Arc::new(MockTransport::new());
    let gateway = gateway(signed_out(), &transport);

    let err = gateway
        .request_value(&RequestDescriptor::get("/contacts"))
        .await
        .expect_err("no session");

    assert_eq!(err.kind(), ApiErrorKind::Unauthenticated);
    assert_eq!(err.status_code(), 401);
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn concurrent_identical_requests_share_one_call() {
    let (session, _area) = signed_in();
    let transport = Arc::new(MockTransport::gated());
    transport.push_json(200, json!({"items": [{"id": 1}], "page": 1}));
    let gateway = gateway(session, &transport);
    let descriptor = RequestDescriptor::get("/contacts").param("page", 1);

    let (a, b, ()) = tokio::join!(
        gateway.request_value(&descriptor),
        gateway.request_value(&descriptor),
        async {
            settle().await;
            assert_eq!(transport.calls(), 1);
            assert_eq!(gateway.in_flight(), 1);
            transport.release(1);
        }
    );

    let a = a.expect("first caller");
    let b = b.expect("second caller");
    assert_eq!(a, json!({"items": [{"id": 1}], "page": 1}));
    assert_eq!(a, b);
    assert_eq!(transport.calls(), 1);
    assert_eq!(gateway.in_flight(), 0);
    assert_eq!(gateway.metrics().deduplicated, 1);
}

#[tokio::test]
async fn distinct_params_are_not_deduplicated() {
    let (session, _area) = signed_in();
    let transport = Arc::new(MockTransport::gated());
    transport.push_json(200, json!({"page": "first"}));
    transport.push_json(200, json!({"page": "second"}));
    let gateway = gateway(session, &transport);
    let first = RequestDescriptor::get("/contacts").param("page", 1);
    let second = RequestDescriptor::get("/contacts").param("page", 2);

    let (a, b, ()) = tokio::join!(
        gateway.request_value(&first),
        gateway.request_value(&second),
        async {
            settle().await;
            assert_eq!(gateway.in_flight(), 2);
            transport.release(2);
        }
    );

    assert!(a.is_ok() && b.is_ok());
    assert_eq!(transport.calls(), 2);
    let urls: Vec<String> = transport.requests().into_iter().map(|r| r.url).collect();
    assert!(urls.contains(&"https://api.example.com/api/contacts?page=1".to_owned()));
    assert!(urls.contains(&"https://api.example.com/api/contacts?page=2".to_owned()));
}

#[tokio::test]
async fn joined_callers_share_a_failure() {
    let (session, _area) = signed_in();
    let transport = Arc::new(MockTransport::gated());
    transport.push_error(TransportError::connect("connection reset"));
    let gateway = gateway(session, &transport);
    let descriptor = RequestDescriptor::get("/lists");

    let (a, b, ()) = tokio::join!(
        gateway.request_value(&descriptor),
        gateway.request_value(&descriptor),
        async {
            settle().await;
            transport.release(1);
        }
    );

    let a = a.expect_err("shared failure");
    let b = b.expect_err("shared failure");
    assert!(a.is_network() && b.is_network());
    assert_eq!(a.message(), b.message());
    assert_eq!(transport.calls(), 1);

    transport.push_json(200, json!([]));
    transport.release(1);
    gateway.request_value(&descriptor).await.expect("fresh call after failure");
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn server_401_expires_the_session() {
    let (session, area) = signed_in();
    let transport = Arc::new(MockTransport::new());
    transport.push_json(401, json!({"detail": "Token has expired"}));
    let gateway = gateway(session.clone(), &transport);

    let err = gateway
        .request_value(&RequestDescriptor::get("/contacts"))
        .await
        .expect_err("rejected credential");

    assert_eq!(err.kind(), ApiErrorKind::SessionExpired);
    assert_eq!(err.message(), "Token has expired");
    assert!(!session.state().is_authenticated());
    assert!(!session.state().is_unknown());
    assert_eq!(area.get(DEFAULT_STORAGE_KEY).expect("readable"), None);
    assert_eq!(gateway.metrics().session_expired, 1);

    let err = gateway
        .request_value(&RequestDescriptor::get("/contacts"))
        .await
        .expect_err("signed out");
    assert_eq!(err.kind(), ApiErrorKind::Unauthenticated);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn rate_limited_mutation_keeps_session_and_notifies_once() {
    let (session, area) = signed_in();
    let token = session.token();
    let transport = Arc::new(MockTransport::new());
    transport.push_json(429, json!({"message": "Slow down"}));
    let gateway = gateway(session.clone(), &transport);
    let queries = QueryClient::default();
    let notifier = RecordingNotifier::new();
    let descriptor = RequestDescriptor::post("/campaigns").json(json!({"name": "Spring"}));

    let err = queries
        .execute_mutation(&notifier, || gateway.request_value(&descriptor))
        .await
        .expect_err("throttled");

    assert_eq!(err.kind(), ApiErrorKind::RateLimited);
    assert_eq!(err.status_code(), 429);
    assert_eq!(session.token(), token);
    assert!(area.get(DEFAULT_STORAGE_KEY).expect("readable").is_some());
    assert_eq!(notifier.notifications(), vec![Notification::rate_limited()]);
    assert_eq!(transport.calls(), 1);
    assert_eq!(gateway.metrics().rate_limited, 1);
}

#[tokio::test(start_paused = true)]
async fn read_succeeds_after_two_network_failures() {
    let (session, _area) = signed_in();
    let transport = Arc::new(MockTransport::new());
    transport.push_error(TransportError::connect("connection refused"));
    transport.push_error(TransportError::connect("connection refused"));
    transport.push_json(200, json!({"total": 42}));
    let gateway = gateway(session, &transport);
    let queries = QueryClient::default();
    let descriptor = RequestDescriptor::get("/contacts/count");

    let result = queries
        .fetch_query("contacts/count", &QueryOptions::default(), || {
            gateway.request_value(&descriptor)
        })
        .await
        .expect("errors are reported in the result");

    assert_eq!(result.status, QueryStatus::Success);
    assert_eq!(result.data, Some(json!({"total": 42})));
    assert_eq!(transport.calls(), 3);
    assert_eq!(queries.metrics().retries, 2);
}

#[tokio::test(start_paused = true)]
async fn read_gives_up_after_three_network_failures() {
    let (session, _area) = signed_in();
    let transport = Arc::new(MockTransport::new());
    transport.set_fallback(Err(TransportError::connect("connection refused")));
    let gateway = gateway(session, &transport);
    let queries = QueryClient::default();
    let descriptor = RequestDescriptor::get("/contacts");

    let result = queries
        .fetch_query("contacts", &QueryOptions::default(), || gateway.request_value(&descriptor))
        .await
        .expect("errors are reported in the result");

    assert_eq!(result.status, QueryStatus::Error);
    assert!(result.error.expect("error").is_network());
    assert_eq!(transport.calls(), 3);
}

proptest! {
    #[test]
    fn private_paths_without_session_never_reach_the_network(
        path in "/[a-z]{1,10}(/[a-z0-9]{1,8}){0,2}",
        page in 0i64..1000,
    ) {
        prop_assume!(!config().is_public_route(&path));
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");

        runtime.block_on(async {
            let transport = Arc::new(MockTransport::new());
            let gateway = gateway(signed_out(), &transport);
            let descriptor = RequestDescriptor::get(path.as_str()).param("page", page);

            let err = gateway.request_value(&descriptor).await.expect_err("no session");

            assert_eq!(err.kind(), ApiErrorKind::Unauthenticated);
            assert_eq!(transport.calls(), 0);
        });
    }
}
