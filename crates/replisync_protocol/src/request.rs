//! Authentication request payloads.

use crate::{Credentials, ProtocolResult, Token};
use serde::Serialize;
use serde_json::{Map, Value};

/// Wire identifier for the credential provider backing a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// An already logged-in user presenting a refresh token.
    Realm,
    /// Debug users, always granted outside production.
    Debug,
    /// Username/password login.
    Password,
    /// Facebook OAuth login.
    Facebook,
}

/// A request against the authentication service.
///
/// Encapsulates the JSON payload the service understands. Use the
/// constructors to build the right shape for each flow; `to_json` produces
/// the final payload.
#[derive(Debug, Clone, Serialize)]
pub struct AuthenticateRequest {
    provider: Provider,
    data: String,
    app_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    user_info: Map<String, Value>,
}

impl AuthenticateRequest {
    /// Builds a login request for a user.
    ///
    /// `create_user` asks the service to register the account first; it is
    /// carried as `register` in the `user_info` map for every credential
    /// kind.
    pub fn from_credentials(
        credentials: &Credentials,
        create_user: bool,
        app_id: impl Into<String>,
    ) -> Self {
        let mut user_info = Map::new();
        user_info.insert("register".into(), Value::Bool(create_user));

        let (provider, data) = match credentials {
            Credentials::UsernamePassword { username, password } => {
                user_info.insert("password".into(), Value::String(password.clone()));
                (Provider::Password, username.clone())
            }
            Credentials::Facebook { token } => (Provider::Facebook, token.clone()),
            Credentials::Debug { username } => (Provider::Debug, username.clone()),
        };

        Self {
            provider,
            data,
            app_id: app_id.into(),
            path: None,
            user_info,
        }
    }

    /// Builds a request for access to one remote replica path, using the
    /// refresh token of an already logged-in user.
    pub fn from_refresh_token(
        refresh_token: &Token,
        path: impl Into<String>,
        app_id: impl Into<String>,
    ) -> Self {
        Self {
            provider: Provider::Realm,
            data: refresh_token.value().to_owned(),
            app_id: app_id.into(),
            path: Some(path.into()),
            user_info: Map::new(),
        }
    }

    /// Builds a token-refresh request for an already logged-in user.
    pub fn refresh(token: &Token, app_id: impl Into<String>) -> Self {
        Self {
            provider: Provider::Realm,
            data: token.value().to_owned(),
            app_id: app_id.into(),
            path: None,
            user_info: Map::new(),
        }
    }

    /// The provider this request authenticates through.
    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Serializes the request into the JSON payload sent on the wire.
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_request_shape() {
        let credentials = Credentials::username_password("jane", "hunter2");
        let request = AuthenticateRequest::from_credentials(&credentials, true, "app-1");
        let json: Value = serde_json::from_str(&request.to_json().unwrap()).unwrap();

        assert_eq!(json["provider"], "password");
        assert_eq!(json["data"], "jane");
        assert_eq!(json["app_id"], "app-1");
        assert_eq!(json["user_info"]["register"], true);
        assert_eq!(json["user_info"]["password"], "hunter2");
        assert!(json.get("path").is_none());
    }

    #[test]
    fn facebook_request_has_no_password() {
        let credentials = Credentials::facebook("fb-token");
        let request = AuthenticateRequest::from_credentials(&credentials, false, "app-1");
        let json: Value = serde_json::from_str(&request.to_json().unwrap()).unwrap();

        assert_eq!(json["provider"], "facebook");
        assert_eq!(json["data"], "fb-token");
        assert_eq!(json["user_info"]["register"], false);
        assert!(json["user_info"].get("password").is_none());
    }

    #[test]
    fn refresh_token_request_carries_path() {
        let refresh = Token::new("refresh-value", u64::MAX);
        let request = AuthenticateRequest::from_refresh_token(&refresh, "/private/notes", "app-1");
        let json: Value = serde_json::from_str(&request.to_json().unwrap()).unwrap();

        assert_eq!(json["provider"], "realm");
        assert_eq!(json["data"], "refresh-value");
        assert_eq!(json["path"], "/private/notes");
        assert_eq!(json["user_info"], Value::Object(Map::new()));
    }

    #[test]
    fn debug_request() {
        let request =
            AuthenticateRequest::from_credentials(&Credentials::admin(), false, "app-1");
        let json: Value = serde_json::from_str(&request.to_json().unwrap()).unwrap();

        assert_eq!(json["provider"], "debug");
        assert_eq!(json["data"], "admin");
    }
}
