//! Session state machine.
//!
//! The lifecycle is expressed as a pure transition table: [`transition`]
//! maps the current state and an event to the next state plus the effects
//! the session must execute. The table itself performs no side effects,
//! which keeps every row unit-testable in isolation. Effects run after the
//! state change, in order: effects that undo the previous state come before
//! effects that set up the new one, so leaving a state never tears down
//! what the next state still needs.

use replisync_protocol::{ErrorCategory, ObjectServerError};

/// The lifecycle state of a [`crate::Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Created but not started. Listeners can still be registered.
    Initial,
    /// No synchronization is happening. `bind` starts it.
    Unbound,
    /// A binding to the remote replica is being established.
    Binding,
    /// Credentials expired; a background task is acquiring new ones.
    Authenticating,
    /// Actively synchronizing with the remote replica.
    Bound,
    /// Terminal. The session no longer works; the registry hands out a
    /// fresh session for the same configuration.
    Stopped,
}

impl SessionState {
    /// Returns true for the terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Stopped)
    }

    /// Returns true in the states that may hold a native handle.
    pub fn may_hold_handle(&self) -> bool {
        matches!(
            self,
            SessionState::Binding | SessionState::Authenticating | SessionState::Bound
        )
    }
}

/// Events driving the session state machine.
///
/// The first four come from the public API; the rest are raised internally
/// while executing effects or delivered by background tasks and the native
/// layer.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SessionEvent {
    Start,
    Bind,
    Unbind,
    Stop,
    /// The native layer accepted the binding.
    BindCompleted,
    /// The native layer rejected the binding.
    BindFailed(ObjectServerError),
    /// No usable access token is cached for the target replica.
    TokenRequired,
    /// The background authentication task obtained a fresh token.
    AuthSucceeded,
    /// The background authentication task gave up with a terminal error.
    AuthFailed(ObjectServerError),
    /// An error surfaced through `on_error`; the state reacts by category.
    ErrorReported(ErrorCategory),
}

impl SessionEvent {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            SessionEvent::Start => "start",
            SessionEvent::Bind => "bind",
            SessionEvent::Unbind => "unbind",
            SessionEvent::Stop => "stop",
            SessionEvent::BindCompleted => "bind-completed",
            SessionEvent::BindFailed(_) => "bind-failed",
            SessionEvent::TokenRequired => "token-required",
            SessionEvent::AuthSucceeded => "auth-succeeded",
            SessionEvent::AuthFailed(_) => "auth-failed",
            SessionEvent::ErrorReported(_) => "error-reported",
        }
    }
}

/// Side effects the session executes after a transition.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Effect {
    /// Tell the policy the session is ready to bind.
    NotifyPolicy,
    /// Open the native handle if needed and attempt to bind, raising
    /// `TokenRequired` when no usable access token is cached.
    BeginBind,
    /// Submit the background authentication retry task.
    BeginAuthentication,
    /// Cancel the in-flight authentication task, if any.
    CancelAuthTask,
    /// Release the native handle, if one is open.
    ReleaseHandle,
    /// Hand the error to the policy/handler chain.
    ReportError(ObjectServerError),
}

/// Outcome of feeding one event to the table.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Transition {
    /// The event is benign here and does nothing.
    Ignore,
    /// The event is not legal in this state; it is dropped with a logged
    /// diagnostic.
    Illegal,
    /// Move to a new state and execute the effects.
    Move(SessionState, Vec<Effect>),
}

/// The session lifecycle transition table: one row per (state, event) pair.
pub(crate) fn transition(state: SessionState, event: SessionEvent) -> Transition {
    use SessionEvent as E;
    use SessionState as S;

    match (state, event) {
        // INITIAL: only start and stop mean anything yet.
        (S::Initial, E::Start) => Transition::Move(S::Unbound, vec![Effect::NotifyPolicy]),
        (S::Initial, E::Stop) => Transition::Move(S::Stopped, vec![]),
        (S::Initial, E::Bind | E::Unbind) => Transition::Illegal,

        // UNBOUND: idle; bind starts the binding process.
        (S::Unbound, E::Bind) => Transition::Move(S::Binding, vec![Effect::BeginBind]),
        (S::Unbound, E::Stop) => Transition::Move(S::Stopped, vec![]),
        (S::Unbound, E::Start | E::Unbind) => Transition::Ignore,

        // BINDING: the handle is open; the native bind is in progress.
        (S::Binding, E::Unbind) => Transition::Move(S::Unbound, vec![Effect::ReleaseHandle]),
        (S::Binding, E::Stop) => Transition::Move(S::Stopped, vec![Effect::ReleaseHandle]),
        (S::Binding, E::TokenRequired) => {
            // The handle survives: authentication binds through it next.
            Transition::Move(S::Authenticating, vec![Effect::BeginAuthentication])
        }
        (S::Binding, E::BindCompleted) => Transition::Move(S::Bound, vec![]),
        (S::Binding, E::BindFailed(error)) => Transition::Move(
            S::Unbound,
            vec![Effect::ReleaseHandle, Effect::ReportError(error)],
        ),
        (S::Binding, E::ErrorReported(ErrorCategory::Fatal)) => {
            Transition::Move(S::Unbound, vec![Effect::ReleaseHandle])
        }
        (S::Binding, E::Start | E::Bind) => Transition::Ignore,

        // AUTHENTICATING: a retry task owns credential acquisition.
        (S::Authenticating, E::Unbind) => Transition::Move(
            S::Unbound,
            vec![Effect::CancelAuthTask, Effect::ReleaseHandle],
        ),
        (S::Authenticating, E::Stop) => Transition::Move(
            S::Stopped,
            vec![Effect::CancelAuthTask, Effect::ReleaseHandle],
        ),
        (S::Authenticating, E::AuthSucceeded) => {
            Transition::Move(S::Binding, vec![Effect::BeginBind])
        }
        (S::Authenticating, E::AuthFailed(error)) => Transition::Move(
            S::Unbound,
            vec![Effect::ReleaseHandle, Effect::ReportError(error)],
        ),
        (S::Authenticating, E::ErrorReported(ErrorCategory::Fatal)) => Transition::Move(
            S::Unbound,
            vec![Effect::CancelAuthTask, Effect::ReleaseHandle],
        ),
        (S::Authenticating, E::Start | E::Bind) => Transition::Ignore,

        // BOUND: synchronizing; only fatal errors tear the binding down.
        (S::Bound, E::Unbind) => Transition::Move(S::Unbound, vec![Effect::ReleaseHandle]),
        (S::Bound, E::Stop) => Transition::Move(S::Stopped, vec![Effect::ReleaseHandle]),
        (S::Bound, E::ErrorReported(ErrorCategory::Fatal)) => {
            Transition::Move(S::Unbound, vec![Effect::ReleaseHandle])
        }
        (S::Bound, E::Start | E::Bind) => Transition::Ignore,

        // STOPPED: terminal. stop() stays idempotent.
        (S::Stopped, E::Stop) => Transition::Ignore,
        (S::Stopped, E::Start | E::Bind | E::Unbind) => Transition::Illegal,

        // Everything else: stale internal events (a state was left while
        // its work was in flight) and non-fatal reported errors. Dropping
        // them is safe because leaving a state invalidates its in-flight
        // work via generation bump or handle release.
        _ => Transition::Ignore,
    }
}
