//! Session configuration and retry backoff parameters.

use crate::policy::{ManualSyncPolicy, SyncPolicy};
use crate::session::ErrorHandler;
use crate::user::User;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Immutable identity of a session: which local replica binds to which
/// remote replica on behalf of which user.
///
/// Two configurations are equal when their local path, server URL, and user
/// identity match; the error handler and policy never participate in
/// equality, so the registry keys sessions purely on replica identity.
#[derive(Clone)]
pub struct SyncConfiguration {
    local_path: PathBuf,
    server_url: String,
    user: Arc<User>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    policy: Arc<dyn SyncPolicy>,
}

impl SyncConfiguration {
    /// Creates a configuration for the given local replica, remote URL, and
    /// user.
    pub fn new(
        local_path: impl Into<PathBuf>,
        server_url: impl Into<String>,
        user: Arc<User>,
    ) -> Self {
        Self {
            local_path: local_path.into(),
            server_url: server_url.into(),
            user,
            error_handler: None,
            policy: Arc::new(ManualSyncPolicy),
        }
    }

    /// Sets the per-session error handler.
    pub fn with_error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Sets the sync policy driving this session.
    pub fn with_policy(mut self, policy: Arc<dyn SyncPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Path of the local replica.
    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    /// URL of the remote replica on the sync server.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// The user this session authenticates as.
    pub fn user(&self) -> &Arc<User> {
        &self.user
    }

    /// The per-session error handler, if one was configured.
    pub fn error_handler(&self) -> Option<&Arc<dyn ErrorHandler>> {
        self.error_handler.as_ref()
    }

    /// The sync policy driving this session.
    pub fn policy(&self) -> &Arc<dyn SyncPolicy> {
        &self.policy
    }
}

impl fmt::Debug for SyncConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfiguration")
            .field("local_path", &self.local_path)
            .field("server_url", &self.server_url)
            .field("user", &self.user.identity())
            .finish()
    }
}

impl PartialEq for SyncConfiguration {
    fn eq(&self, other: &Self) -> bool {
        self.local_path == other.local_path
            && self.server_url == other.server_url
            && self.user.identity() == other.user.identity()
    }
}

impl Eq for SyncConfiguration {}

impl Hash for SyncConfiguration {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.local_path.hash(state);
        self.server_url.hash(state);
        self.user.identity().hash(state);
    }
}

/// Exponential backoff between authentication retry attempts.
///
/// The first attempt runs immediately; attempt `n` (zero-indexed retry
/// count) waits `min(base * 2^(n-1), cap)`. Delays are deterministic and
/// monotonically non-decreasing.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    base: Duration,
    cap: Duration,
}

impl BackoffConfig {
    /// Creates a backoff configuration from a base delay and a cap.
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// The delay before the attempt with zero-indexed retry count `retry`.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = match 1u32.checked_shl(retry - 1) {
            Some(factor) => factor,
            None => return self.cap,
        };
        match self.base.checked_mul(factor) {
            Some(delay) => delay.min(self.cap),
            None => self.cap,
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(5 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use replisync_protocol::Token;

    fn test_user(identity: &str) -> Arc<User> {
        Arc::new(User::new(
            identity,
            "https://auth.example.com",
            Token::new("refresh", u64::MAX),
        ))
    }

    #[test]
    fn equality_ignores_handler_and_policy() {
        let user = test_user("u1");
        let plain = SyncConfiguration::new("/tmp/a", "realm://server/a", Arc::clone(&user));
        let with_policy = SyncConfiguration::new("/tmp/a", "realm://server/a", user)
            .with_policy(Arc::new(ManualSyncPolicy));
        assert_eq!(plain, with_policy);
    }

    #[test]
    fn equality_covers_identity_fields() {
        let a = SyncConfiguration::new("/tmp/a", "realm://server/a", test_user("u1"));
        let other_path = SyncConfiguration::new("/tmp/b", "realm://server/a", test_user("u1"));
        let other_url = SyncConfiguration::new("/tmp/a", "realm://server/b", test_user("u1"));
        let other_user = SyncConfiguration::new("/tmp/a", "realm://server/a", test_user("u2"));
        assert_ne!(a, other_path);
        assert_ne!(a, other_url);
        assert_ne!(a, other_user);
    }

    #[test]
    fn first_attempt_has_no_delay() {
        let backoff = BackoffConfig::default();
        assert_eq!(backoff.delay_for_attempt(0), Duration::ZERO);
    }

    #[test]
    fn delays_double_until_the_cap() {
        let backoff = BackoffConfig::new(Duration::from_secs(1), Duration::from_secs(300));
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(backoff.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(backoff.delay_for_attempt(9), Duration::from_secs(256));
        assert_eq!(backoff.delay_for_attempt(10), Duration::from_secs(300));
        assert_eq!(backoff.delay_for_attempt(11), Duration::from_secs(300));
    }

    #[test]
    fn huge_retry_counts_saturate_at_the_cap() {
        let backoff = BackoffConfig::default();
        assert_eq!(backoff.delay_for_attempt(u32::MAX), Duration::from_secs(300));
    }

    proptest! {
        #[test]
        fn delays_are_monotone_and_capped(a in 0u32..128, b in 0u32..128) {
            let backoff = BackoffConfig::default();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(backoff.delay_for_attempt(lo) <= backoff.delay_for_attempt(hi));
            prop_assert!(backoff.delay_for_attempt(hi) <= Duration::from_secs(300));
        }
    }
}
