//! Error codes and the error type reported by the object server.

use thiserror::Error;

/// Severity category of an [`ErrorCode`].
///
/// The category drives log level and retry eligibility: fatal errors tear a
/// session down, recoverable errors may be retried or survived, info errors
/// are purely informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The session cannot continue.
    Fatal,
    /// The condition is transient or survivable.
    Recoverable,
    /// Informational only.
    Info,
}

/// Error codes returned by the object server or raised by the client.
///
/// Codes are grouped by range: 1xx connection-level, 2xx session-level,
/// 3xx client-side, 6xx authentication service, 7xx local resource limits.
/// Every code belongs to exactly one [`ErrorCategory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Code not recognized by this client version.
    Unknown,
    /// The server closed the connection in an orderly fashion.
    ConnectionClosed,
    /// Connection-level failure other than an orderly close.
    OtherConnectionError,
    /// The session was closed by the server.
    SessionClosed,
    /// The access token used to bind has expired.
    AccessTokenExpired,
    /// The server rejected the presented token outright.
    BadAuthentication,
    /// The requested remote replica path is malformed or not allowed.
    IllegalReplicaPath,
    /// The user lacks permission for the requested replica.
    PermissionDenied,
    /// Session-level failure not covered by a more specific code.
    OtherSessionError,
    /// Network-level I/O failure. The only code eligible for automatic
    /// authentication retry.
    IoException,
    /// A payload could not be encoded or decoded.
    JsonException,
    /// The auth service rejected the request parameters.
    InvalidParameters,
    /// The auth request was missing required parameters.
    MissingParameters,
    /// Wrong username/password or equivalent.
    InvalidCredentials,
    /// The account does not exist.
    UnknownAccount,
    /// The account already exists (registration flows).
    ExistingAccount,
    /// The auth service denied access to the requested path.
    AccessDenied,
    /// The refresh token itself has expired; the user must log in again.
    ExpiredRefreshToken,
    /// A local resource limit was hit (e.g. the retry worker pool is full).
    ResourceExhausted,
}

impl ErrorCode {
    /// Decodes a wire integer into an error code.
    ///
    /// Integers not assigned in this client version decode to
    /// [`ErrorCode::Unknown`].
    pub fn from_int(code: i32) -> Self {
        match code {
            100 => Self::ConnectionClosed,
            101 => Self::OtherConnectionError,
            200 => Self::SessionClosed,
            202 => Self::AccessTokenExpired,
            203 => Self::BadAuthentication,
            204 => Self::IllegalReplicaPath,
            206 => Self::PermissionDenied,
            299 => Self::OtherSessionError,
            300 => Self::IoException,
            301 => Self::JsonException,
            601 => Self::InvalidParameters,
            602 => Self::MissingParameters,
            611 => Self::InvalidCredentials,
            612 => Self::UnknownAccount,
            613 => Self::ExistingAccount,
            614 => Self::AccessDenied,
            615 => Self::ExpiredRefreshToken,
            700 => Self::ResourceExhausted,
            _ => Self::Unknown,
        }
    }

    /// The wire integer for this code.
    pub fn as_int(&self) -> i32 {
        match self {
            Self::Unknown => -1,
            Self::ConnectionClosed => 100,
            Self::OtherConnectionError => 101,
            Self::SessionClosed => 200,
            Self::AccessTokenExpired => 202,
            Self::BadAuthentication => 203,
            Self::IllegalReplicaPath => 204,
            Self::PermissionDenied => 206,
            Self::OtherSessionError => 299,
            Self::IoException => 300,
            Self::JsonException => 301,
            Self::InvalidParameters => 601,
            Self::MissingParameters => 602,
            Self::InvalidCredentials => 611,
            Self::UnknownAccount => 612,
            Self::ExistingAccount => 613,
            Self::AccessDenied => 614,
            Self::ExpiredRefreshToken => 615,
            Self::ResourceExhausted => 700,
        }
    }

    /// The severity category this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConnectionClosed | Self::SessionClosed => ErrorCategory::Info,
            Self::AccessTokenExpired | Self::IoException => ErrorCategory::Recoverable,
            _ => ErrorCategory::Fatal,
        }
    }

    /// Returns true if an authentication attempt failing with this code may
    /// be retried automatically.
    pub fn is_retry_eligible(&self) -> bool {
        matches!(self, Self::IoException)
    }
}

/// An error reported by the object server or raised internally, carrying an
/// [`ErrorCode`] and a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (error code {})", .code.as_int())]
pub struct ObjectServerError {
    code: ErrorCode,
    message: String,
}

impl ObjectServerError {
    /// Creates an error from a code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Decodes an error from its wire integer and message.
    pub fn from_int(code: i32, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::from_int(code), message)
    }

    /// The error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// The severity category of the underlying code.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }
}
