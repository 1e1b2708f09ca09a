//! The process-wide sync controller.
//!
//! A [`SyncContext`] replaces the usual pile of static singletons with an
//! explicitly constructed object: it owns the session registry, the
//! authentication server and native transport implementations, the default
//! error handler, and the worker pool running authentication retries. Tests
//! build a fresh context each; production builds one per process.

use crate::auth::AuthenticationServer;
use crate::config::{BackoffConfig, SyncConfiguration};
use crate::pool::WorkerPool;
use crate::registry::SessionRegistry;
use crate::session::{ErrorHandler, Session};
use crate::transport::SyncTransport;
use parking_lot::RwLock;
use replisync_protocol::{ErrorCategory, ObjectServerError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Default number of worker threads for authentication retries.
const DEFAULT_WORKERS: usize = 10;
/// Default bounded queue depth of the worker pool.
const DEFAULT_QUEUE_DEPTH: usize = 100;

/// Errors from [`SyncContextBuilder::build`].
#[derive(Debug, Error)]
pub enum ContextBuildError {
    /// No authentication server implementation was provided.
    #[error("no authentication server configured")]
    MissingAuthenticationServer,
    /// No native transport implementation was provided.
    #[error("no sync transport configured")]
    MissingTransport,
}

pub(crate) struct ContextInner {
    auth_server: RwLock<Arc<dyn AuthenticationServer>>,
    transport: RwLock<Arc<dyn SyncTransport>>,
    default_handler: RwLock<Arc<dyn ErrorHandler>>,
    backoff: BackoffConfig,
    pool: WorkerPool,
    registry: SessionRegistry,
    shut_down: AtomicBool,
}

impl ContextInner {
    pub(crate) fn auth_server(&self) -> Arc<dyn AuthenticationServer> {
        Arc::clone(&self.auth_server.read())
    }

    pub(crate) fn transport(&self) -> Arc<dyn SyncTransport> {
        Arc::clone(&self.transport.read())
    }

    pub(crate) fn default_error_handler(&self) -> Arc<dyn ErrorHandler> {
        Arc::clone(&self.default_handler.read())
    }

    pub(crate) fn backoff(&self) -> &BackoffConfig {
        &self.backoff
    }

    pub(crate) fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub(crate) fn registry(&self) -> &SessionRegistry {
        &self.registry
    }
}

/// The controller every session hangs off.
///
/// Cheap to clone; all clones share one registry, pool, and set of
/// pluggable implementations.
#[derive(Clone)]
pub struct SyncContext {
    inner: Arc<ContextInner>,
}

impl SyncContext {
    /// Starts building a context.
    pub fn builder() -> SyncContextBuilder {
        SyncContextBuilder::new()
    }

    /// Returns the live session for `configuration`, creating one if none
    /// exists. Repeated calls return the identical session until it stops;
    /// afterwards a fresh session is created.
    pub fn session(&self, configuration: SyncConfiguration) -> Arc<Session> {
        self.inner.registry.get_or_create(configuration, &self.inner)
    }

    /// Number of live sessions in the registry.
    pub fn session_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Replaces the default error handler used by sessions without one of
    /// their own. `None` restores the logging sink.
    pub fn set_default_error_handler(&self, handler: Option<Arc<dyn ErrorHandler>>) {
        *self.inner.default_handler.write() =
            handler.unwrap_or_else(|| Arc::new(LoggingErrorHandler));
    }

    /// Replaces the authentication server implementation. Intended for
    /// injecting stubs in tests.
    pub fn set_authentication_server(&self, server: Arc<dyn AuthenticationServer>) {
        *self.inner.auth_server.write() = server;
    }

    /// Replaces the native transport implementation. Intended for injecting
    /// stubs in tests.
    pub fn set_transport(&self, transport: Arc<dyn SyncTransport>) {
        *self.inner.transport.write() = transport;
    }

    /// Delivers an error that originated below the per-session abstraction
    /// and cannot be attributed to one session: every live session's
    /// `on_error` sees it.
    ///
    /// Misattribution is inherent to this channel; it exists for transport
    /// layers that do not identify the affected session in their error
    /// callbacks.
    pub fn broadcast_unattributed_error(&self, error: ObjectServerError) {
        debug!("broadcasting unattributed error to all sessions: {error}");
        for session in self.inner.registry.live_sessions() {
            session.on_error(error.clone());
        }
    }

    /// Stops every live session and joins the worker pool. Idempotent.
    ///
    /// Must not be called from an error-handler callback: those can run on
    /// pool workers, and the pool cannot join itself.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        for session in self.inner.registry.live_sessions() {
            session.stop();
        }
        self.inner.pool.shutdown();
    }
}

/// Builder for [`SyncContext`].
pub struct SyncContextBuilder {
    auth_server: Option<Arc<dyn AuthenticationServer>>,
    transport: Option<Arc<dyn SyncTransport>>,
    default_handler: Option<Arc<dyn ErrorHandler>>,
    backoff: BackoffConfig,
    workers: usize,
    queue_depth: usize,
}

impl SyncContextBuilder {
    fn new() -> Self {
        Self {
            auth_server: None,
            transport: None,
            default_handler: None,
            backoff: BackoffConfig::default(),
            workers: DEFAULT_WORKERS,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }

    /// Sets the authentication server implementation. Required.
    pub fn with_authentication_server(mut self, server: Arc<dyn AuthenticationServer>) -> Self {
        self.auth_server = Some(server);
        self
    }

    /// Sets the native transport implementation. Required.
    pub fn with_transport(mut self, transport: Arc<dyn SyncTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the default error handler. Defaults to the logging sink.
    pub fn with_default_error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.default_handler = Some(handler);
        self
    }

    /// Sets the backoff schedule for authentication retries.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sizes the retry worker pool.
    pub fn with_worker_pool(mut self, workers: usize, queue_depth: usize) -> Self {
        self.workers = workers;
        self.queue_depth = queue_depth;
        self
    }

    /// Builds the context, spawning the worker pool.
    pub fn build(self) -> Result<SyncContext, ContextBuildError> {
        let auth_server = self
            .auth_server
            .ok_or(ContextBuildError::MissingAuthenticationServer)?;
        let transport = self.transport.ok_or(ContextBuildError::MissingTransport)?;
        let default_handler = self
            .default_handler
            .unwrap_or_else(|| Arc::new(LoggingErrorHandler));

        Ok(SyncContext {
            inner: Arc::new(ContextInner {
                auth_server: RwLock::new(auth_server),
                transport: RwLock::new(transport),
                default_handler: RwLock::new(default_handler),
                backoff: self.backoff,
                pool: WorkerPool::new(self.workers, self.queue_depth),
                registry: SessionRegistry::new(),
                shut_down: AtomicBool::new(false),
            }),
        })
    }
}

/// The fallback error sink: logs every error at the level its category
/// calls for.
#[derive(Debug, Default)]
pub struct LoggingErrorHandler;

impl ErrorHandler for LoggingErrorHandler {
    fn on_error(&self, session: &Session, error: &ObjectServerError) {
        let message = format!(
            "session error[{}]: {}",
            session.configuration().server_url(),
            error
        );
        match error.category() {
            ErrorCategory::Fatal => tracing::error!("{message}"),
            ErrorCategory::Recoverable => tracing::info!("{message}"),
            ErrorCategory::Info => tracing::debug!("{message}"),
        }
    }
}
