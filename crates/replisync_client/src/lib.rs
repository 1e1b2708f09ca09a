//! # Replisync Client
//!
//! Session lifecycle controller binding local replicas to a sync server.
//!
//! This crate provides:
//! - `Session` state machine (initial → unbound → binding → bound)
//! - Background authentication with exponential backoff and cancellation
//! - Session registry with single-flight creation per configuration
//! - `SyncContext` controller owning the pluggable pieces
//! - Native transport and authentication server abstractions with mocks
//!
//! ## Architecture
//!
//! A session is obtained from the context for a [`SyncConfiguration`] and
//! driven through `start`/`bind`/`unbind`/`stop`. Binding opens a native
//! handle and attaches it to the remote replica with the user's access
//! token; when the token is missing or expired the session authenticates in
//! the background, retrying transient failures with exponential backoff,
//! then resumes binding. Errors never surface synchronously: they flow
//! through the policy and error-handler chain.
//!
//! ## Key Invariants
//!
//! - One live session per configuration
//! - All state transitions for a session are totally ordered
//! - The native handle is held only while binding, authenticating, or bound
//! - A cancelled authentication task invokes neither continuation
//! - Stopped is terminal

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod config;
mod context;
mod policy;
mod pool;
mod registry;
mod session;
mod state;
mod transport;
mod user;

pub use auth::{
    AuthenticationServer, HttpAuthenticationServer, HttpClient, MockAuthenticationServer,
};
pub use config::{BackoffConfig, SyncConfiguration};
pub use context::{ContextBuildError, LoggingErrorHandler, SyncContext, SyncContextBuilder};
pub use policy::{AutomaticBindPolicy, ManualSyncPolicy, SyncPolicy};
pub use pool::{CancelToken, PoolError, WorkerPool};
pub use session::{ErrorHandler, Session};
pub use state::SessionState;
pub use transport::{
    MockTransport, SyncTransport, TransportCall, TransportError, TransportResult,
};
pub use user::User;
