//! End-to-end tests for the session lifecycle: FSM, authentication retry,
//! error dispatch, and the registry, wired against the mock auth service
//! and mock native transport.

use parking_lot::Mutex;
use replisync_client::{
    AutomaticBindPolicy, BackoffConfig, ErrorHandler, MockAuthenticationServer, MockTransport,
    Session, SessionState, SyncConfiguration, SyncContext, TransportCall, User,
};
use replisync_protocol::{
    AuthenticateResponse, ErrorCategory, ErrorCode, ObjectServerError, Token,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

fn far_future_ms() -> u64 {
    now_ms() + 60 * 60 * 1000
}

struct Harness {
    context: SyncContext,
    auth: Arc<MockAuthenticationServer>,
    transport: Arc<MockTransport>,
}

fn harness() -> Harness {
    harness_with(|builder| builder)
}

fn harness_with(
    customize: impl FnOnce(replisync_client::SyncContextBuilder) -> replisync_client::SyncContextBuilder,
) -> Harness {
    init_tracing();
    let auth = Arc::new(MockAuthenticationServer::new());
    let transport = Arc::new(MockTransport::new());
    let builder = SyncContext::builder()
        .with_authentication_server(Arc::clone(&auth) as _)
        .with_transport(Arc::clone(&transport) as _)
        .with_backoff(BackoffConfig::new(
            Duration::from_millis(10),
            Duration::from_millis(100),
        ));
    let context = customize(builder).build().unwrap();
    Harness {
        context,
        auth,
        transport,
    }
}

fn test_user(identity: &str) -> Arc<User> {
    Arc::new(User::new(
        identity,
        "https://auth.example.com",
        Token::new("refresh-token", u64::MAX),
    ))
}

#[derive(Default)]
struct RecordingHandler {
    errors: Mutex<Vec<ObjectServerError>>,
}

impl RecordingHandler {
    fn errors(&self) -> Vec<ObjectServerError> {
        self.errors.lock().clone()
    }
}

impl ErrorHandler for RecordingHandler {
    fn on_error(&self, _session: &Session, error: &ObjectServerError) {
        self.errors.lock().push(error.clone());
    }
}

fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    predicate()
}

fn io_error() -> AuthenticateResponse {
    AuthenticateResponse::from_error(ObjectServerError::new(
        ErrorCode::IoException,
        "connection timed out",
    ))
}

#[test]
fn start_moves_a_fresh_session_to_unbound() {
    let harness = harness();
    let replica_dir = tempfile::tempdir().unwrap();
    let session = harness.context.session(SyncConfiguration::new(
        replica_dir.path().join("replica.db"),
        "realm://server/a",
        test_user("u1"),
    ));

    assert_eq!(session.state(), SessionState::Initial);
    session.start();
    assert_eq!(session.state(), SessionState::Unbound);
    assert!(!session.is_bound());
}

#[test]
fn bind_without_token_authenticates_with_retries_then_binds() {
    let harness = harness();
    // Two transient failures, then a token.
    harness.auth.enqueue_response(io_error());
    harness.auth.enqueue_response(io_error());
    harness
        .auth
        .enqueue_response(AuthenticateResponse::from_token(Token::new(
            "fresh-token",
            far_future_ms(),
        )));

    let session = harness.context.session(SyncConfiguration::new(
        "/replica/a",
        "realm://server/a",
        test_user("u1"),
    ));
    session.start();
    session.bind();
    // The retry task runs in the background; binding resumes on success.
    assert!(wait_until(Duration::from_secs(5), || session.is_bound()));

    assert_eq!(harness.auth.call_count(), 3);
    assert!(session.is_authenticated());

    let calls = harness.transport.calls();
    assert!(matches!(calls[0], TransportCall::Open(_)));
    assert!(calls.iter().any(|call| matches!(
        call,
        TransportCall::Bind { access_token, .. } if access_token == "fresh-token"
    )));
}

#[test]
fn terminal_auth_error_stops_retrying_and_unbinds() {
    let harness = harness();
    harness.auth.set_fallback_response(AuthenticateResponse::from_error(
        ObjectServerError::new(ErrorCode::InvalidCredentials, "wrong password"),
    ));

    let handler = Arc::new(RecordingHandler::default());
    let session = harness.context.session(
        SyncConfiguration::new("/replica/a", "realm://server/a", test_user("u1"))
            .with_error_handler(Arc::clone(&handler) as _),
    );
    session.start();
    session.bind();

    assert!(wait_until(Duration::from_secs(5), || {
        session.state() == SessionState::Unbound && !handler.errors().is_empty()
    }));

    // One attempt only: invalid credentials are not retried.
    assert_eq!(harness.auth.call_count(), 1);
    let errors = handler.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code(), ErrorCode::InvalidCredentials);
    // The handle opened for binding was released on the way back.
    assert_eq!(harness.transport.active_handle_count(), 0);
}

#[test]
fn registry_returns_the_same_session_until_stopped() {
    let harness = harness();
    let user = test_user("u1");
    let config = SyncConfiguration::new("/replica/a", "realm://server/a", user);

    let first = harness.context.session(config.clone());
    let second = harness.context.session(config.clone());
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(harness.context.session_count(), 1);

    first.start();
    first.stop();
    assert_eq!(first.state(), SessionState::Stopped);
    assert_eq!(harness.context.session_count(), 0);

    let third = harness.context.session(config);
    assert!(!Arc::ptr_eq(&first, &third));
    assert_eq!(third.state(), SessionState::Initial);
}

#[test]
fn concurrent_lookups_create_one_session() {
    let harness = harness();
    let user = test_user("u1");
    let config = SyncConfiguration::new("/replica/a", "realm://server/a", user);

    let sessions: Vec<_> = (0..8)
        .map(|_| {
            let context = harness.context.clone();
            let config = config.clone();
            thread::spawn(move || context.session(config))
        })
        .map(|handle| handle.join().unwrap())
        .collect();

    for session in &sessions[1..] {
        assert!(Arc::ptr_eq(&sessions[0], session));
    }
    assert_eq!(harness.context.session_count(), 1);
}

#[test]
fn stop_from_bound_releases_the_handle_and_is_terminal() {
    let harness = harness();
    let user = test_user("u1");
    user.add_access_token("realm://server/a", Token::new("cached", far_future_ms()));

    let session = harness.context.session(SyncConfiguration::new(
        "/replica/a",
        "realm://server/a",
        user,
    ));
    session.start();
    session.bind();
    // A usable cached token binds without touching the auth service.
    assert!(session.is_bound());
    assert_eq!(harness.auth.call_count(), 0);
    assert_eq!(harness.transport.active_handle_count(), 1);

    session.stop();
    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(harness.transport.active_handle_count(), 0);

    // Terminal: bind() is a logged no-op now.
    session.bind();
    assert_eq!(session.state(), SessionState::Stopped);
    session.stop();
    assert_eq!(session.state(), SessionState::Stopped);
}

#[test]
fn unbind_during_authentication_cancels_without_any_continuation() {
    let harness = harness_with(|builder| {
        // Long backoff keeps the retry task asleep while we cancel it.
        builder.with_backoff(BackoffConfig::new(
            Duration::from_secs(30),
            Duration::from_secs(300),
        ))
    });
    harness.auth.set_fallback_response(io_error());

    let handler = Arc::new(RecordingHandler::default());
    let session = harness.context.session(
        SyncConfiguration::new("/replica/a", "realm://server/a", test_user("u1"))
            .with_error_handler(Arc::clone(&handler) as _),
    );
    session.start();
    session.bind();
    assert_eq!(session.state(), SessionState::Authenticating);

    // Let the first (immediate) attempt fail so the task is in its backoff
    // sleep, then cancel by unbinding.
    assert!(wait_until(Duration::from_secs(5), || {
        harness.auth.call_count() >= 1
    }));
    session.unbind();
    assert_eq!(session.state(), SessionState::Unbound);

    // Neither continuation may run: no further attempts, no error report,
    // no state change.
    thread::sleep(Duration::from_millis(300));
    assert_eq!(harness.auth.call_count(), 1);
    assert_eq!(session.state(), SessionState::Unbound);
    assert!(handler.errors().is_empty());
    assert_eq!(harness.transport.active_handle_count(), 0);
}

#[test]
fn stop_during_authentication_cancels_and_releases() {
    let harness = harness_with(|builder| {
        builder.with_backoff(BackoffConfig::new(
            Duration::from_secs(30),
            Duration::from_secs(300),
        ))
    });
    harness.auth.set_fallback_response(io_error());

    let session = harness.context.session(SyncConfiguration::new(
        "/replica/a",
        "realm://server/a",
        test_user("u1"),
    ));
    session.start();
    session.bind();
    assert!(wait_until(Duration::from_secs(5), || {
        harness.auth.call_count() >= 1
    }));

    session.stop();
    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(harness.transport.active_handle_count(), 0);

    thread::sleep(Duration::from_millis(300));
    assert_eq!(harness.auth.call_count(), 1);
}

#[test]
fn expired_token_forces_authentication_before_binding() {
    let harness = harness();
    let user = test_user("u1");
    // A token that expired a minute ago must never reach the native bind.
    user.add_access_token(
        "realm://server/a",
        Token::new("stale-token", now_ms() - 60_000),
    );
    harness
        .auth
        .enqueue_response(AuthenticateResponse::from_token(Token::new(
            "renewed-token",
            far_future_ms(),
        )));

    let session = harness.context.session(SyncConfiguration::new(
        "/replica/a",
        "realm://server/a",
        user,
    ));
    session.start();
    assert!(!session.is_authenticated());
    session.bind();
    assert!(wait_until(Duration::from_secs(5), || session.is_bound()));

    assert_eq!(harness.auth.call_count(), 1);
    for call in harness.transport.calls() {
        if let TransportCall::Bind { access_token, .. } = call {
            assert_eq!(access_token, "renewed-token");
        }
    }
}

#[test]
fn native_bind_failure_reports_and_returns_to_unbound() {
    let harness = harness();
    let user = test_user("u1");
    user.add_access_token("realm://server/a", Token::new("cached", far_future_ms()));
    harness.transport.enqueue_bind_error(
        replisync_client::TransportError::new(ErrorCode::IllegalReplicaPath, "bad path"),
    );

    let handler = Arc::new(RecordingHandler::default());
    let session = harness.context.session(
        SyncConfiguration::new("/replica/a", "realm://server/a", user)
            .with_error_handler(Arc::clone(&handler) as _),
    );
    session.start();
    session.bind();

    assert_eq!(session.state(), SessionState::Unbound);
    let errors = handler.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code(), ErrorCode::IllegalReplicaPath);
    assert_eq!(harness.transport.active_handle_count(), 0);
}

#[test]
fn broadcast_reaches_every_live_session() {
    let harness = harness();
    let handler_a = Arc::new(RecordingHandler::default());
    let handler_b = Arc::new(RecordingHandler::default());

    let user = test_user("u1");
    user.add_access_token("realm://server/a", Token::new("cached", far_future_ms()));

    let bound = harness.context.session(
        SyncConfiguration::new("/replica/a", "realm://server/a", Arc::clone(&user))
            .with_error_handler(Arc::clone(&handler_a) as _),
    );
    bound.start();
    bound.bind();
    assert!(bound.is_bound());

    let idle = harness.context.session(
        SyncConfiguration::new("/replica/b", "realm://server/b", user)
            .with_error_handler(Arc::clone(&handler_b) as _),
    );
    idle.start();

    // An info-level error is delivered everywhere but changes no state.
    harness
        .context
        .broadcast_unattributed_error(ObjectServerError::new(
            ErrorCode::ConnectionClosed,
            "server went away",
        ));

    assert_eq!(handler_a.errors().len(), 1);
    assert_eq!(handler_b.errors().len(), 1);
    assert_eq!(handler_a.errors()[0].category(), ErrorCategory::Info);
    assert!(bound.is_bound());
    assert_eq!(idle.state(), SessionState::Unbound);
}

#[test]
fn fatal_error_while_bound_tears_the_binding_down() {
    let harness = harness();
    let user = test_user("u1");
    user.add_access_token("realm://server/a", Token::new("cached", far_future_ms()));

    let handler = Arc::new(RecordingHandler::default());
    let session = harness.context.session(
        SyncConfiguration::new("/replica/a", "realm://server/a", user)
            .with_error_handler(Arc::clone(&handler) as _),
    );
    session.start();
    session.bind();
    assert!(session.is_bound());

    session.on_error(ObjectServerError::new(
        ErrorCode::OtherSessionError,
        "session torn down by server",
    ));

    assert_eq!(session.state(), SessionState::Unbound);
    assert_eq!(harness.transport.active_handle_count(), 0);
    assert_eq!(handler.errors().len(), 1);

    // Recoverable errors leave a re-bound session alone.
    session.bind();
    assert!(session.is_bound());
    session.on_error(ObjectServerError::new(
        ErrorCode::AccessTokenExpired,
        "token refresh advised",
    ));
    assert!(session.is_bound());
}

#[test]
fn saturated_worker_pool_surfaces_a_fatal_error() {
    let harness = harness_with(|builder| builder.with_worker_pool(1, 1));
    // Keep the single worker busy long enough to queue and overflow.
    harness.auth.set_response_delay(Duration::from_millis(500));
    harness.auth.set_fallback_response(AuthenticateResponse::from_token(
        Token::new("token", far_future_ms()),
    ));

    let handlers: Vec<_> = (0..3).map(|_| Arc::new(RecordingHandler::default())).collect();
    let sessions: Vec<_> = (0..3)
        .map(|i| {
            let session = harness.context.session(
                SyncConfiguration::new(
                    format!("/replica/{i}"),
                    format!("realm://server/{i}"),
                    test_user("u1"),
                )
                .with_error_handler(Arc::clone(&handlers[i]) as _),
            );
            session.start();
            session
        })
        .collect();

    // First task occupies the worker...
    sessions[0].bind();
    assert!(wait_until(Duration::from_secs(5), || {
        harness.auth.call_count() >= 1
    }));
    // ...the second sits in the queue, and the third is rejected outright.
    sessions[1].bind();
    sessions[2].bind();
    assert_eq!(sessions[2].state(), SessionState::Unbound);
    let errors = handlers[2].errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code(), ErrorCode::ResourceExhausted);
    assert_eq!(errors[0].category(), ErrorCategory::Fatal);

    // The two accepted tasks complete normally.
    assert!(wait_until(Duration::from_secs(5), || {
        sessions[0].is_bound() && sessions[1].is_bound()
    }));
}

#[test]
fn automatic_policy_binds_on_start() {
    let harness = harness();
    let user = test_user("u1");
    user.add_access_token("realm://server/a", Token::new("cached", far_future_ms()));

    let session = harness.context.session(
        SyncConfiguration::new("/replica/a", "realm://server/a", user)
            .with_policy(Arc::new(AutomaticBindPolicy)),
    );
    session.start();
    assert!(session.is_bound());
}

#[test]
fn notify_commit_is_forwarded_only_while_bound() {
    let harness = harness();
    let user = test_user("u1");
    user.add_access_token("realm://server/a", Token::new("cached", far_future_ms()));

    let session = harness.context.session(SyncConfiguration::new(
        "/replica/a",
        "realm://server/a",
        user,
    ));
    session.start();
    session.notify_commit(1);
    session.bind();
    session.notify_commit(2);
    session.unbind();
    session.notify_commit(3);

    let commits: Vec<_> = harness
        .transport
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            TransportCall::NotifyCommit { version, .. } => Some(version),
            _ => None,
        })
        .collect();
    assert_eq!(commits, vec![2]);
}

#[test]
fn concurrent_lifecycle_calls_never_corrupt_the_machine() {
    let harness = harness();
    harness.auth.set_fallback_response(AuthenticateResponse::from_token(
        Token::new("token", far_future_ms()),
    ));

    let session = harness.context.session(SyncConfiguration::new(
        "/replica/a",
        "realm://server/a",
        test_user("u1"),
    ));
    session.start();

    let threads: Vec<_> = (0..8)
        .map(|i| {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                for round in 0..50 {
                    match (i + round) % 3 {
                        0 => session.bind(),
                        1 => session.unbind(),
                        _ => {
                            let _ = session.is_bound();
                        }
                    }
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    // Whatever interleaving happened, the session landed in a legal
    // non-terminal state and can still be driven to bound and stopped.
    assert!(matches!(
        session.state(),
        SessionState::Unbound
            | SessionState::Binding
            | SessionState::Authenticating
            | SessionState::Bound
    ));
    session.bind();
    assert!(wait_until(Duration::from_secs(5), || session.is_bound()));
    session.stop();
    assert_eq!(session.state(), SessionState::Stopped);
    assert!(wait_until(Duration::from_secs(5), || {
        harness.transport.active_handle_count() == 0
    }));
}

#[test]
fn shutdown_stops_all_sessions() {
    let harness = harness();
    let user = test_user("u1");
    user.add_access_token("realm://server/a", Token::new("cached", far_future_ms()));

    let session = harness.context.session(SyncConfiguration::new(
        "/replica/a",
        "realm://server/a",
        user,
    ));
    session.start();
    session.bind();
    assert!(session.is_bound());

    harness.context.shutdown();
    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(harness.context.session_count(), 0);
    assert_eq!(harness.transport.active_handle_count(), 0);
}
