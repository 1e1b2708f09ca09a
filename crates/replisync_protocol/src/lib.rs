//! # Replisync Protocol
//!
//! Authentication protocol types and JSON codecs for replisync.
//!
//! This crate provides:
//! - `Token` for access and refresh credentials
//! - `Credentials` for the supported login providers
//! - `AuthenticateRequest` and the JSON payload sent to the auth service
//! - `AuthenticateResponse` / `RefreshResponse` decoding
//! - The `ErrorCode` taxonomy shared between client and server
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod credentials;
mod error;
mod request;
mod response;
mod token;

pub use credentials::Credentials;
pub use error::{ErrorCategory, ErrorCode, ObjectServerError};
pub use request::{AuthenticateRequest, Provider};
pub use response::{AuthenticateResponse, RefreshResponse};
pub use token::Token;

/// Result type for protocol encode/decode operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding protocol payloads.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// JSON serialization or deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
