//! Native sync layer boundary.
//!
//! The storage/replication engine that actually transmits and applies
//! changesets lives below this trait. Sessions drive it through opaque
//! handles: `open` yields a nonzero handle for a local replica, `bind`
//! attaches it to a remote replica with an access token, `unbind` releases
//! it. A handle is owned by exactly one session.

use parking_lot::Mutex;
use replisync_protocol::{ErrorCode, ObjectServerError};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// An error reported by the native sync layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (error code {})", .code.as_int())]
pub struct TransportError {
    code: ErrorCode,
    message: String,
}

impl TransportError {
    /// Creates a transport error from a code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<TransportError> for ObjectServerError {
    fn from(error: TransportError) -> Self {
        ObjectServerError::new(error.code, error.message)
    }
}

/// The native sync layer a session binds through.
///
/// Implementations perform no retries and report failures as-is; all
/// failure policy lives in the session FSM.
pub trait SyncTransport: Send + Sync {
    /// Opens a native session for the local replica at `local_path`.
    ///
    /// The returned handle is nonzero and stays valid until passed to
    /// [`SyncTransport::unbind`].
    fn open(&self, local_path: &Path) -> TransportResult<u64>;

    /// Binds an open handle to the remote replica at `server_url` using an
    /// access token.
    fn bind(&self, handle: u64, server_url: &str, access_token: &str) -> TransportResult<()>;

    /// Releases a handle, closing any active binding.
    fn unbind(&self, handle: u64) -> TransportResult<()>;

    /// Tells the native layer that local version `version` was committed.
    fn notify_commit(&self, handle: u64, version: u64);
}

/// One recorded call against [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    /// `open` was called for a local path.
    Open(PathBuf),
    /// `bind` was called.
    Bind {
        /// Handle passed to bind.
        handle: u64,
        /// Remote replica URL.
        server_url: String,
        /// Access token value used.
        access_token: String,
    },
    /// `unbind` was called for a handle.
    Unbind(u64),
    /// `notify_commit` was called.
    NotifyCommit {
        /// Handle the commit was reported on.
        handle: u64,
        /// Committed version.
        version: u64,
    },
}

/// A scriptable in-memory transport for testing.
///
/// Hands out sequential handles, records every call, and fails `open`/`bind`
/// with queued errors when scripted to.
#[derive(Default)]
pub struct MockTransport {
    next_handle: AtomicU64,
    open_errors: Mutex<VecDeque<TransportError>>,
    bind_errors: Mutex<VecDeque<TransportError>>,
    active_handles: Mutex<Vec<u64>>,
    calls: Mutex<Vec<TransportCall>>,
}

impl MockTransport {
    /// Creates a mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an error for the next `open` call.
    pub fn enqueue_open_error(&self, error: TransportError) {
        self.open_errors.lock().push_back(error);
    }

    /// Queues an error for the next `bind` call.
    pub fn enqueue_bind_error(&self, error: TransportError) {
        self.bind_errors.lock().push_back(error);
    }

    /// All calls recorded so far, in order.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }

    /// Number of handles opened but not yet released.
    pub fn active_handle_count(&self) -> usize {
        self.active_handles.lock().len()
    }
}

impl SyncTransport for MockTransport {
    fn open(&self, local_path: &Path) -> TransportResult<u64> {
        self.calls
            .lock()
            .push(TransportCall::Open(local_path.to_path_buf()));
        if let Some(error) = self.open_errors.lock().pop_front() {
            return Err(error);
        }
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst) + 1;
        self.active_handles.lock().push(handle);
        Ok(handle)
    }

    fn bind(&self, handle: u64, server_url: &str, access_token: &str) -> TransportResult<()> {
        self.calls.lock().push(TransportCall::Bind {
            handle,
            server_url: server_url.to_owned(),
            access_token: access_token.to_owned(),
        });
        if let Some(error) = self.bind_errors.lock().pop_front() {
            return Err(error);
        }
        Ok(())
    }

    fn unbind(&self, handle: u64) -> TransportResult<()> {
        self.calls.lock().push(TransportCall::Unbind(handle));
        self.active_handles.lock().retain(|h| *h != handle);
        Ok(())
    }

    fn notify_commit(&self, handle: u64, version: u64) {
        self.calls
            .lock()
            .push(TransportCall::NotifyCommit { handle, version });
    }
}
