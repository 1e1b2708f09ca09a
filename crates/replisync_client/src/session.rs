//! Per-configuration session controlling the binding to one remote replica.

use crate::config::SyncConfiguration;
use crate::context::ContextInner;
use crate::pool::{CancelToken, PoolError};
use crate::state::{transition, Effect, SessionEvent, SessionState, Transition};
use crate::user::unix_time_ms;
use parking_lot::Mutex;
use replisync_protocol::{ErrorCode, ObjectServerError};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Callback for errors on a session.
///
/// Invoked on an unspecified thread with no internal lock held. The call
/// must be treated as non-reentrant-safe: re-entering the session
/// (`bind`/`unbind`/`stop`) is allowed and goes through the lock like any
/// other caller.
pub trait ErrorHandler: Send + Sync {
    /// Called for every error surfacing on `session` that reaches this
    /// handler.
    fn on_error(&self, session: &Session, error: &ObjectServerError);
}

struct SessionInner {
    state: SessionState,
    /// Native handle; nonzero only in BINDING, AUTHENTICATING, and BOUND.
    handle: u64,
    /// Bumped whenever an authentication task is started or cancelled, so a
    /// stale task's late delivery can be recognized and dropped.
    auth_generation: u64,
    auth_cancel: Option<CancelToken>,
}

/// Work that must happen after the session lock is released: callbacks and
/// registry removal never run under the lock.
#[derive(Default)]
struct DispatchOutcome {
    notify_ready: bool,
    stopped: bool,
    reports: Vec<ObjectServerError>,
}

/// A session drives the binding between one local replica and one remote
/// replica, owning the lifecycle state machine, the native handle, and the
/// background authentication task.
///
/// Sessions are created through [`crate::SyncContext::session`] and shared
/// as `Arc<Session>`. All public operations serialize on one internal lock;
/// the lock is never held across a network call or a callback.
pub struct Session {
    configuration: SyncConfiguration,
    context: Weak<ContextInner>,
    weak_self: Weak<Session>,
    inner: Mutex<SessionInner>,
}

impl Session {
    pub(crate) fn new(
        configuration: SyncConfiguration,
        context: Weak<ContextInner>,
        weak_self: Weak<Session>,
    ) -> Self {
        debug!(
            "session created for {}",
            configuration.server_url()
        );
        Self {
            configuration,
            context,
            weak_self,
            inner: Mutex::new(SessionInner {
                state: SessionState::Initial,
                handle: 0,
                auth_generation: 0,
                auth_cancel: None,
            }),
        }
    }

    /// Starts the session, making it ready to bind.
    pub fn start(&self) {
        self.handle_event(SessionEvent::Start);
    }

    /// Stops the session. Terminal; a new session must be created for the
    /// same configuration afterwards.
    pub fn stop(&self) {
        self.handle_event(SessionEvent::Stop);
    }

    /// Begins binding the local replica to the remote one.
    ///
    /// Returns immediately. Failures are asynchronous and arrive through
    /// the error-handler chain, never as a synchronous error.
    pub fn bind(&self) {
        self.handle_event(SessionEvent::Bind);
    }

    /// Stops synchronizing without stopping the session; `bind` may be
    /// called again.
    pub fn unbind(&self) {
        self.handle_event(SessionEvent::Unbind);
    }

    /// Reports an error on this session: the state machine reacts first,
    /// then the policy/handler chain sees the error.
    pub fn on_error(&self, error: ObjectServerError) {
        self.handle_event(SessionEvent::ErrorReported(error.category()));
        self.deliver_to_handlers(&error);
    }

    /// Returns true while actively synchronizing with the remote replica.
    pub fn is_bound(&self) -> bool {
        self.state() == SessionState::Bound
    }

    /// The current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Returns true if the user holds a usable access token for this
    /// session's remote replica.
    pub fn is_authenticated(&self) -> bool {
        self.configuration
            .user()
            .has_usable_access_token(self.configuration.server_url(), unix_time_ms())
    }

    /// The configuration this session was created from.
    pub fn configuration(&self) -> &SyncConfiguration {
        &self.configuration
    }

    /// Tells the native layer that local version `version` was committed.
    /// Ignored unless the session is bound.
    pub fn notify_commit(&self, version: u64) {
        let inner = self.inner.lock();
        if inner.state != SessionState::Bound {
            return;
        }
        if let Some(context) = self.context.upgrade() {
            context.transport().notify_commit(inner.handle, version);
        }
    }

    fn handle_event(&self, event: SessionEvent) {
        let outcome = {
            let mut inner = self.inner.lock();
            self.dispatch(&mut inner, event)
        };
        self.finish(outcome);
    }

    /// Feeds one event through the transition table, then runs the
    /// resulting effects; effects may raise further internal events, which
    /// are drained here before the lock is released.
    fn dispatch(&self, inner: &mut SessionInner, event: SessionEvent) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        let mut pending = VecDeque::new();
        pending.push_back(event);

        while let Some(event) = pending.pop_front() {
            let name = event.name();
            match transition(inner.state, event) {
                Transition::Ignore => {}
                Transition::Illegal => warn!(
                    "session[{}]: '{}' is not legal in state {:?}, ignoring",
                    self.configuration.server_url(),
                    name,
                    inner.state
                ),
                Transition::Move(next, effects) => {
                    debug!(
                        "session[{}]: {:?} -> {:?}",
                        self.configuration.server_url(),
                        inner.state,
                        next
                    );
                    inner.state = next;
                    if next == SessionState::Stopped {
                        outcome.stopped = true;
                    }
                    for effect in effects {
                        self.run_effect(inner, effect, &mut pending, &mut outcome);
                    }
                }
            }
        }

        outcome
    }

    fn run_effect(
        &self,
        inner: &mut SessionInner,
        effect: Effect,
        pending: &mut VecDeque<SessionEvent>,
        outcome: &mut DispatchOutcome,
    ) {
        match effect {
            Effect::NotifyPolicy => outcome.notify_ready = true,
            Effect::BeginBind => self.begin_bind(inner, pending),
            Effect::BeginAuthentication => self.begin_authentication(inner, pending),
            Effect::CancelAuthTask => {
                if let Some(cancel) = inner.auth_cancel.take() {
                    cancel.cancel();
                }
                inner.auth_generation = inner.auth_generation.wrapping_add(1);
            }
            Effect::ReleaseHandle => self.release_handle(inner, outcome),
            Effect::ReportError(error) => outcome.reports.push(error),
        }
    }

    /// Opens the native handle if necessary and attempts the bind. A
    /// missing or expired access token raises `TokenRequired` instead of
    /// touching the network.
    fn begin_bind(&self, inner: &mut SessionInner, pending: &mut VecDeque<SessionEvent>) {
        let Some(context) = self.context.upgrade() else {
            pending.push_back(SessionEvent::BindFailed(ObjectServerError::new(
                ErrorCode::OtherSessionError,
                "sync context has been shut down",
            )));
            return;
        };
        let transport = context.transport();

        if inner.handle == 0 {
            match transport.open(self.configuration.local_path()) {
                Ok(handle) => {
                    debug_assert_ne!(handle, 0, "native layer returned a null handle");
                    inner.handle = handle;
                }
                Err(error) => {
                    pending.push_back(SessionEvent::BindFailed(error.into()));
                    return;
                }
            }
        }

        let server_url = self.configuration.server_url();
        let token = self.configuration.user().access_token(server_url);
        match token {
            Some(token) if token.is_usable(unix_time_ms()) => {
                match transport.bind(inner.handle, server_url, token.value()) {
                    Ok(()) => pending.push_back(SessionEvent::BindCompleted),
                    Err(error) => pending.push_back(SessionEvent::BindFailed(error.into())),
                }
            }
            _ => pending.push_back(SessionEvent::TokenRequired),
        }
    }

    /// Submits the background authentication retry task, cancelling any
    /// previous one. At most one task per session is ever in flight.
    fn begin_authentication(&self, inner: &mut SessionInner, pending: &mut VecDeque<SessionEvent>) {
        if let Some(previous) = inner.auth_cancel.take() {
            previous.cancel();
        }
        inner.auth_generation = inner.auth_generation.wrapping_add(1);
        let generation = inner.auth_generation;

        let Some(context) = self.context.upgrade() else {
            pending.push_back(SessionEvent::AuthFailed(ObjectServerError::new(
                ErrorCode::OtherSessionError,
                "sync context has been shut down",
            )));
            return;
        };
        let Some(session) = self.weak_self.upgrade() else {
            return;
        };

        let cancel = CancelToken::new();
        inner.auth_cancel = Some(cancel.clone());

        let auth_server = context.auth_server();
        let backoff = context.backoff().clone();
        let user = Arc::clone(self.configuration.user());
        let server_url = self.configuration.server_url().to_owned();

        let task = move || {
            let mut attempt: u32 = 0;
            let outcome = loop {
                attempt += 1;
                let delay = backoff.delay_for_attempt(attempt - 1);
                if cancel.wait_timeout(delay) {
                    // Cancelled: neither continuation runs.
                    return;
                }

                let response = auth_server.authenticate_path(
                    user.refresh_token(),
                    &server_url,
                    user.authentication_url(),
                );
                if cancel.is_cancelled() {
                    return;
                }

                if let Some(token) = response.access_token() {
                    user.add_access_token(&server_url, token.clone());
                    break Ok(());
                }

                let error = response.error().cloned().unwrap_or_else(|| {
                    ObjectServerError::new(ErrorCode::Unknown, "auth response carried no error")
                });
                // Only transient I/O failures are worth another attempt;
                // every other code is terminal for this cycle.
                if !error.code().is_retry_eligible() {
                    break Err(error);
                }
                debug!(
                    "session[{}]: authentication attempt {} failed with {}, retrying",
                    server_url, attempt, error
                );
            };

            match outcome {
                Ok(()) => session.deliver_auth_success(generation),
                Err(error) => session.deliver_auth_failure(generation, error),
            }
        };

        if let Err(error) = context.pool().try_execute(task) {
            inner.auth_cancel = None;
            let error = match error {
                PoolError::Saturated => ObjectServerError::new(
                    ErrorCode::ResourceExhausted,
                    "authentication worker pool is saturated",
                ),
                PoolError::Terminated => ObjectServerError::new(
                    ErrorCode::OtherSessionError,
                    "authentication worker pool has been shut down",
                ),
            };
            pending.push_back(SessionEvent::AuthFailed(error));
        }
    }

    fn release_handle(&self, inner: &mut SessionInner, outcome: &mut DispatchOutcome) {
        if inner.handle == 0 {
            return;
        }
        let handle = inner.handle;
        inner.handle = 0;
        if let Some(context) = self.context.upgrade() {
            if let Err(error) = context.transport().unbind(handle) {
                outcome.reports.push(error.into());
            }
        }
    }

    /// Continuation for a successful authentication task. Dropped unless
    /// the delivering task is still the current one and the session is
    /// still authenticating.
    pub(crate) fn deliver_auth_success(&self, generation: u64) {
        let outcome = {
            let mut inner = self.inner.lock();
            if inner.auth_generation != generation
                || inner.state != SessionState::Authenticating
            {
                debug!(
                    "session[{}]: dropping stale authentication success",
                    self.configuration.server_url()
                );
                return;
            }
            inner.auth_cancel = None;
            self.dispatch(&mut inner, SessionEvent::AuthSucceeded)
        };
        self.finish(outcome);
    }

    /// Continuation for a failed authentication task; same staleness rules
    /// as [`Session::deliver_auth_success`].
    pub(crate) fn deliver_auth_failure(&self, generation: u64, error: ObjectServerError) {
        let outcome = {
            let mut inner = self.inner.lock();
            if inner.auth_generation != generation
                || inner.state != SessionState::Authenticating
            {
                debug!(
                    "session[{}]: dropping stale authentication failure: {}",
                    self.configuration.server_url(),
                    error
                );
                return;
            }
            inner.auth_cancel = None;
            self.dispatch(&mut inner, SessionEvent::AuthFailed(error))
        };
        self.finish(outcome);
    }

    /// Runs everything that must happen outside the lock: registry
    /// removal, the policy readiness callback, and error reports.
    fn finish(&self, outcome: DispatchOutcome) {
        if outcome.stopped {
            if let Some(context) = self.context.upgrade() {
                context.registry().remove(&self.configuration);
            }
        }
        if outcome.notify_ready {
            self.configuration.policy().on_session_ready(self);
        }
        for error in outcome.reports {
            self.deliver_to_handlers(&error);
        }
    }

    /// Error dispatch chain: policy first, then the configured handler,
    /// then the context default handler as the fallback sink.
    fn deliver_to_handlers(&self, error: &ObjectServerError) {
        if self.configuration.policy().on_error(self, error) {
            return;
        }
        if let Some(handler) = self.configuration.error_handler() {
            handler.on_error(self, error);
            return;
        }
        if let Some(context) = self.context.upgrade() {
            context.default_error_handler().on_error(self, error);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.state == SessionState::Stopped {
            return;
        }
        // Deterministic release happens on the STOPPED transition; this is
        // a diagnostic backstop for sessions that were never stopped.
        warn!(
            "session[{}]: dropped in state {:?} without stop(), releasing resources",
            self.configuration.server_url(),
            inner.state
        );
        if let Some(cancel) = inner.auth_cancel.take() {
            cancel.cancel();
        }
        if inner.handle != 0 {
            if let Some(context) = self.context.upgrade() {
                let _ = context.transport().unbind(inner.handle);
            }
            inner.handle = 0;
        }
    }
}
