//! Authentication service boundary.
//!
//! Implementations of [`AuthenticationServer`] execute a single network
//! request and report the outcome as-is. They never retry and never
//! interpret errors; the retry policy lives entirely in the session's
//! authentication task.

use parking_lot::Mutex;
use replisync_protocol::{
    AuthenticateRequest, AuthenticateResponse, Credentials, ErrorCode, ObjectServerError,
    RefreshResponse, Token,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// The authentication service consumed by sessions.
pub trait AuthenticationServer: Send + Sync {
    /// Logs a user in, optionally registering the account first.
    fn authenticate_user(
        &self,
        credentials: &Credentials,
        authentication_url: &str,
        create_user: bool,
    ) -> AuthenticateResponse;

    /// Exchanges a refresh token for an access token scoped to one remote
    /// replica path.
    fn authenticate_path(
        &self,
        refresh_token: &Token,
        path: &str,
        authentication_url: &str,
    ) -> AuthenticateResponse;

    /// Renews a token before it expires.
    fn refresh(&self, token: &Token, authentication_url: &str) -> RefreshResponse;
}

/// HTTP client abstraction.
///
/// Implement this trait to provide the actual HTTP transport. This allows
/// using different HTTP libraries (reqwest, hyper, ureq, etc.) without the
/// client crate depending on any of them.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request with a JSON body and returns the response body.
    fn post(&self, url: &str, body: &str) -> Result<String, String>;
}

/// An [`AuthenticationServer`] speaking the JSON wire protocol over an
/// abstract [`HttpClient`].
///
/// Transport-level failures surface as [`ErrorCode::IoException`], the one
/// code the authentication task retries on.
pub struct HttpAuthenticationServer<C: HttpClient> {
    client: C,
    app_id: String,
}

impl<C: HttpClient> HttpAuthenticationServer<C> {
    /// Creates an authentication server over the given HTTP client.
    pub fn new(client: C, app_id: impl Into<String>) -> Self {
        Self {
            client,
            app_id: app_id.into(),
        }
    }

    fn post(&self, url: &str, request: &AuthenticateRequest) -> Result<String, ObjectServerError> {
        let body = request
            .to_json()
            .map_err(|e| ObjectServerError::new(ErrorCode::JsonException, e.to_string()))?;
        self.client
            .post(url, &body)
            .map_err(|e| ObjectServerError::new(ErrorCode::IoException, e))
    }
}

impl<C: HttpClient> AuthenticationServer for HttpAuthenticationServer<C> {
    fn authenticate_user(
        &self,
        credentials: &Credentials,
        authentication_url: &str,
        create_user: bool,
    ) -> AuthenticateResponse {
        let request = AuthenticateRequest::from_credentials(credentials, create_user, &self.app_id);
        match self.post(authentication_url, &request) {
            Ok(body) => AuthenticateResponse::from_json(&body),
            Err(error) => AuthenticateResponse::from_error(error),
        }
    }

    fn authenticate_path(
        &self,
        refresh_token: &Token,
        path: &str,
        authentication_url: &str,
    ) -> AuthenticateResponse {
        let request = AuthenticateRequest::from_refresh_token(refresh_token, path, &self.app_id);
        match self.post(authentication_url, &request) {
            Ok(body) => AuthenticateResponse::from_json(&body),
            Err(error) => AuthenticateResponse::from_error(error),
        }
    }

    fn refresh(&self, token: &Token, authentication_url: &str) -> RefreshResponse {
        let request = AuthenticateRequest::refresh(token, &self.app_id);
        match self.post(authentication_url, &request) {
            Ok(body) => RefreshResponse::from_json(&body),
            Err(error) => RefreshResponse::from_error(error),
        }
    }
}

/// A scripted authentication server for testing.
///
/// Responses are served from a queue; when the queue is empty the fallback
/// response (if set) is served instead. Every authenticate call, from
/// either entry point, bumps the call counter.
#[derive(Default)]
pub struct MockAuthenticationServer {
    responses: Mutex<VecDeque<AuthenticateResponse>>,
    fallback: Mutex<Option<AuthenticateResponse>>,
    refresh_responses: Mutex<VecDeque<RefreshResponse>>,
    response_delay: Mutex<Option<Duration>>,
    calls: AtomicU64,
}

impl MockAuthenticationServer {
    /// Creates a mock with no scripted responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the response for one authenticate call.
    pub fn enqueue_response(&self, response: AuthenticateResponse) {
        self.responses.lock().push_back(response);
    }

    /// Sets the response served when the queue is empty.
    pub fn set_fallback_response(&self, response: AuthenticateResponse) {
        *self.fallback.lock() = Some(response);
    }

    /// Queues the response for one refresh call.
    pub fn enqueue_refresh_response(&self, response: RefreshResponse) {
        self.refresh_responses.lock().push_back(response);
    }

    /// Makes every call block for `delay` before answering.
    pub fn set_response_delay(&self, delay: Duration) {
        *self.response_delay.lock() = Some(delay);
    }

    /// Number of authenticate calls served so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> AuthenticateResponse {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.response_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if let Some(response) = self.responses.lock().pop_front() {
            return response;
        }
        self.fallback.lock().clone().unwrap_or_else(|| {
            AuthenticateResponse::from_error(ObjectServerError::new(
                ErrorCode::Unknown,
                "no scripted response",
            ))
        })
    }
}

impl AuthenticationServer for MockAuthenticationServer {
    fn authenticate_user(
        &self,
        _credentials: &Credentials,
        _authentication_url: &str,
        _create_user: bool,
    ) -> AuthenticateResponse {
        self.next_response()
    }

    fn authenticate_path(
        &self,
        _refresh_token: &Token,
        _path: &str,
        _authentication_url: &str,
    ) -> AuthenticateResponse {
        self.next_response()
    }

    fn refresh(&self, _token: &Token, _authentication_url: &str) -> RefreshResponse {
        self.refresh_responses.lock().pop_front().unwrap_or_else(|| {
            RefreshResponse::from_error(ObjectServerError::new(
                ErrorCode::Unknown,
                "no scripted refresh response",
            ))
        })
    }
}
