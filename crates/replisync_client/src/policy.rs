//! Pluggable sync policies.

use crate::session::Session;
use replisync_protocol::ObjectServerError;

/// Decides how a session is driven once it is ready.
///
/// The policy is notified when a session leaves its initial state and gets
/// first refusal on every error before the configured error handler runs.
/// Callbacks are invoked without the session lock held, so a policy may
/// call back into the session (e.g. `bind`).
pub trait SyncPolicy: Send + Sync {
    /// Called once, when the session has started and is ready to bind.
    fn on_session_ready(&self, session: &Session);

    /// Offered every error before the error handlers. Return true to
    /// consume it.
    fn on_error(&self, session: &Session, error: &ObjectServerError) -> bool {
        let _ = (session, error);
        false
    }
}

/// Leaves all binding decisions to the caller.
#[derive(Debug, Default)]
pub struct ManualSyncPolicy;

impl SyncPolicy for ManualSyncPolicy {
    fn on_session_ready(&self, _session: &Session) {}
}

/// Binds as soon as the session is ready.
#[derive(Debug, Default)]
pub struct AutomaticBindPolicy;

impl SyncPolicy for AutomaticBindPolicy {
    fn on_session_ready(&self, session: &Session) {
        session.bind();
    }
}
