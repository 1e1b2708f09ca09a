//! Login credentials for the supported authentication providers.

/// Credentials used to authenticate a user against the auth service.
///
/// Each variant maps to one wire provider; the request builder in
/// [`crate::AuthenticateRequest`] decides how the fields are folded into the
/// JSON payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Username/password login.
    UsernamePassword {
        /// Account username.
        username: String,
        /// Account password. Sent in the `user_info` map, not as `data`.
        password: String,
    },
    /// Facebook OAuth token login.
    Facebook {
        /// The OAuth token obtained from Facebook.
        token: String,
    },
    /// Debug login. Always granted unless the auth service runs in
    /// production mode.
    Debug {
        /// Username to impersonate.
        username: String,
    },
}

impl Credentials {
    /// Username/password credentials.
    pub fn username_password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::UsernamePassword {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Facebook OAuth credentials.
    pub fn facebook(token: impl Into<String>) -> Self {
        Self::Facebook {
            token: token.into(),
        }
    }

    /// Debug credentials for a named user.
    pub fn debug(username: impl Into<String>) -> Self {
        Self::Debug {
            username: username.into(),
        }
    }

    /// Admin debug credentials. Admin access is disabled when the auth
    /// service runs in production mode.
    pub fn admin() -> Self {
        Self::debug("admin")
    }
}
