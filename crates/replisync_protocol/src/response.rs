//! Authentication response decoding.
//!
//! The auth service answers every request with one of two JSON shapes: a
//! token payload on success, or `{"code": <int>, "title": <string>}` on
//! failure. Malformed bodies are reported as [`ErrorCode::JsonException`]
//! so the caller always gets a response object to inspect.

use crate::{ErrorCode, ObjectServerError, Token};
use serde::Deserialize;

#[derive(Deserialize)]
struct AuthenticateBody {
    access_token: Option<Token>,
    code: Option<i32>,
    title: Option<String>,
}

#[derive(Deserialize)]
struct RefreshBody {
    refresh_token: Option<Token>,
    code: Option<i32>,
    title: Option<String>,
}

fn decode_error(code: Option<i32>, title: Option<String>) -> ObjectServerError {
    match code {
        Some(code) => ObjectServerError::from_int(code, title.unwrap_or_default()),
        None => ObjectServerError::new(
            ErrorCode::JsonException,
            "response carried neither a token nor an error code",
        ),
    }
}

/// The result of an authenticate call against the auth service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticateResponse {
    result: Result<Token, ObjectServerError>,
}

impl AuthenticateResponse {
    /// Decodes a response from the raw JSON body.
    pub fn from_json(body: &str) -> Self {
        match serde_json::from_str::<AuthenticateBody>(body) {
            Ok(AuthenticateBody {
                access_token: Some(token),
                ..
            }) => Self::from_token(token),
            Ok(AuthenticateBody { code, title, .. }) => {
                Self::from_error(decode_error(code, title))
            }
            Err(e) => Self::from_error(ObjectServerError::new(
                ErrorCode::JsonException,
                e.to_string(),
            )),
        }
    }

    /// A valid response carrying an access token.
    pub fn from_token(token: Token) -> Self {
        Self { result: Ok(token) }
    }

    /// An invalid response carrying an error.
    pub fn from_error(error: ObjectServerError) -> Self {
        Self { result: Err(error) }
    }

    /// Returns true if the request succeeded and an access token is present.
    pub fn is_valid(&self) -> bool {
        self.result.is_ok()
    }

    /// The granted access token, if the response is valid.
    pub fn access_token(&self) -> Option<&Token> {
        self.result.as_ref().ok()
    }

    /// The error, if the response is invalid.
    pub fn error(&self) -> Option<&ObjectServerError> {
        self.result.as_ref().err()
    }
}

/// The result of a token refresh call against the auth service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshResponse {
    result: Result<Token, ObjectServerError>,
}

impl RefreshResponse {
    /// Decodes a response from the raw JSON body.
    pub fn from_json(body: &str) -> Self {
        match serde_json::from_str::<RefreshBody>(body) {
            Ok(RefreshBody {
                refresh_token: Some(token),
                ..
            }) => Self::from_token(token),
            Ok(RefreshBody { code, title, .. }) => Self::from_error(decode_error(code, title)),
            Err(e) => Self::from_error(ObjectServerError::new(
                ErrorCode::JsonException,
                e.to_string(),
            )),
        }
    }

    /// A valid response carrying the renewed token.
    pub fn from_token(token: Token) -> Self {
        Self { result: Ok(token) }
    }

    /// An invalid response carrying an error.
    pub fn from_error(error: ObjectServerError) -> Self {
        Self { result: Err(error) }
    }

    /// Returns true if the refresh succeeded.
    pub fn is_valid(&self) -> bool {
        self.result.is_ok()
    }

    /// The renewed token, if the response is valid.
    pub fn refresh_token(&self) -> Option<&Token> {
        self.result.as_ref().ok()
    }

    /// The error, if the response is invalid.
    pub fn error(&self) -> Option<&ObjectServerError> {
        self.result.as_ref().err()
    }
}
