//! Access and refresh tokens.

use serde::{Deserialize, Serialize};

/// An opaque credential issued by the authentication service.
///
/// Access tokens authorize access to one remote replica and expire; refresh
/// tokens are long-lived and are exchanged for fresh access tokens. A token
/// is immutable once issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    #[serde(rename = "token")]
    value: String,
    #[serde(rename = "expires")]
    expires_ms: u64,
}

impl Token {
    /// Creates a token from its raw value and expiry (milliseconds since epoch).
    pub fn new(value: impl Into<String>, expires_ms: u64) -> Self {
        Self {
            value: value.into(),
            expires_ms,
        }
    }

    /// The raw credential value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Expiry timestamp in milliseconds since the Unix epoch.
    pub fn expires_ms(&self) -> u64 {
        self.expires_ms
    }

    /// Returns true if the token is still usable at `now_ms`.
    ///
    /// A token whose expiry equals the current time is already unusable.
    pub fn is_usable(&self, now_ms: u64) -> bool {
        self.expires_ms > now_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usability_is_strict() {
        let token = Token::new("secret", 1_000);
        assert!(token.is_usable(999));
        assert!(!token.is_usable(1_000));
        assert!(!token.is_usable(1_001));
    }

    #[test]
    fn wire_field_names() {
        let token = Token::new("abc", 42);
        let json = serde_json::to_value(&token).unwrap();
        assert_eq!(json["token"], "abc");
        assert_eq!(json["expires"], 42);
    }
}
