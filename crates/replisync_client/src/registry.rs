//! Registry mapping configurations to their single live session.

use crate::config::SyncConfiguration;
use crate::context::ContextInner;
use crate::session::Session;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Process-wide (per context) map from configuration to its one live
/// session.
///
/// Creation is single-flight: concurrent lookups for the same configuration
/// observe the same instance, because creation happens under the map lock
/// and performs no I/O. A stopped session is replaced by a fresh one on the
/// next lookup.
pub(crate) struct SessionRegistry {
    sessions: Mutex<HashMap<SyncConfiguration, Arc<Session>>>,
}

impl SessionRegistry {
    pub(crate) fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn get_or_create(
        &self,
        configuration: SyncConfiguration,
        context: &Arc<ContextInner>,
    ) -> Arc<Session> {
        let mut sessions = self.sessions.lock();
        if let Some(existing) = sessions.get(&configuration) {
            if !existing.state().is_terminal() {
                return Arc::clone(existing);
            }
        }
        let session = Arc::new_cyclic(|weak| {
            Session::new(configuration.clone(), Arc::downgrade(context), weak.clone())
        });
        sessions.insert(configuration, Arc::clone(&session));
        session
    }

    pub(crate) fn remove(&self, configuration: &SyncConfiguration) {
        self.sessions.lock().remove(configuration);
    }

    /// Snapshot of every live session, for broadcast and shutdown.
    pub(crate) fn live_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.lock().values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.sessions.lock().len()
    }
}
