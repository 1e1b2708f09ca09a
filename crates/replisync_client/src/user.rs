//! Users and their access-token cache.

use parking_lot::Mutex;
use replisync_protocol::Token;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub(crate) fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A logged-in user: a long-lived refresh token plus a cache of short-lived
/// access tokens keyed by server URL.
///
/// The token cache has its own lock, independent of any session lock: a
/// token refreshed by one session is immediately visible to every other
/// session sharing this user.
pub struct User {
    identity: String,
    authentication_url: String,
    refresh_token: Token,
    access_tokens: Mutex<HashMap<String, Token>>,
}

impl User {
    /// Creates a user from its identity, auth service URL, and refresh token.
    pub fn new(
        identity: impl Into<String>,
        authentication_url: impl Into<String>,
        refresh_token: Token,
    ) -> Self {
        Self {
            identity: identity.into(),
            authentication_url: authentication_url.into(),
            refresh_token,
            access_tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Stable identity of this user.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// URL of the authentication service for this user.
    pub fn authentication_url(&self) -> &str {
        &self.authentication_url
    }

    /// The long-lived refresh token.
    pub fn refresh_token(&self) -> &Token {
        &self.refresh_token
    }

    /// The cached access token for `server_url`, if any.
    pub fn access_token(&self, server_url: &str) -> Option<Token> {
        self.access_tokens.lock().get(server_url).cloned()
    }

    /// Caches an access token for `server_url`, replacing any previous one.
    pub fn add_access_token(&self, server_url: impl Into<String>, token: Token) {
        self.access_tokens.lock().insert(server_url.into(), token);
    }

    /// Returns true if a usable (unexpired at `now_ms`) access token is
    /// cached for `server_url`.
    pub fn has_usable_access_token(&self, server_url: &str, now_ms: u64) -> bool {
        self.access_tokens
            .lock()
            .get(server_url)
            .map(|token| token.is_usable(now_ms))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User::new("u1", "https://auth.example.com", Token::new("refresh", 100))
    }

    #[test]
    fn token_cache_is_keyed_by_server_url() {
        let user = user();
        user.add_access_token("realm://server/a", Token::new("a", 10));
        user.add_access_token("realm://server/b", Token::new("b", 10));

        assert_eq!(user.access_token("realm://server/a").unwrap().value(), "a");
        assert_eq!(user.access_token("realm://server/b").unwrap().value(), "b");
        assert!(user.access_token("realm://server/c").is_none());
    }

    #[test]
    fn add_replaces_previous_token() {
        let user = user();
        user.add_access_token("realm://server/a", Token::new("old", 10));
        user.add_access_token("realm://server/a", Token::new("new", 20));
        assert_eq!(user.access_token("realm://server/a").unwrap().value(), "new");
    }

    #[test]
    fn usability_requires_presence_and_freshness() {
        let user = user();
        assert!(!user.has_usable_access_token("realm://server/a", 0));

        user.add_access_token("realm://server/a", Token::new("t", 50));
        assert!(user.has_usable_access_token("realm://server/a", 49));
        assert!(!user.has_usable_access_token("realm://server/a", 50));
    }
}
