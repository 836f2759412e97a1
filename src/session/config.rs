//! Session engine configuration.

use std::time::Duration;

use super::throttle::ThrottlePolicy;

const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: u64 = 15 * 60;
const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: u64 = 12 * 60 * 60;
const DEFAULT_ISSUE_ATTEMPTS: u32 = 2;
const DEFAULT_CLEANUP_GRACE_SECONDS: u64 = 5 * 60;

#[derive(Clone, Debug)]
pub struct SessionConfig {
    access_token_ttl_seconds: u64,
    refresh_token_ttl_seconds: u64,
    issue_attempts: u32,
    cleanup_grace_seconds: u64,
    throttle: ThrottlePolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            refresh_token_ttl_seconds: DEFAULT_REFRESH_TOKEN_TTL_SECONDS,
            issue_attempts: DEFAULT_ISSUE_ATTEMPTS,
            cleanup_grace_seconds: DEFAULT_CLEANUP_GRACE_SECONDS,
            throttle: ThrottlePolicy::default(),
        }
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: u64) -> Self {
        self.access_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl_seconds(mut self, seconds: u64) -> Self {
        self.refresh_token_ttl_seconds = seconds;
        self
    }

    /// Attempts made to issue a token pair after the credentials checked out.
    /// Values below one are treated as one.
    #[must_use]
    pub fn with_issue_attempts(mut self, attempts: u32) -> Self {
        self.issue_attempts = attempts;
        self
    }

    /// Extra time secrets and token registrations outlive the longest token.
    #[must_use]
    pub fn with_cleanup_grace_seconds(mut self, seconds: u64) -> Self {
        self.cleanup_grace_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_throttle(mut self, policy: ThrottlePolicy) -> Self {
        self.throttle = policy;
        self
    }

    #[must_use]
    pub fn access_token_ttl(&self) -> Duration {
        Duration::from_secs(self.access_token_ttl_seconds)
    }

    #[must_use]
    pub fn refresh_token_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_token_ttl_seconds)
    }

    #[must_use]
    pub fn access_token_ttl_seconds(&self) -> u64 {
        self.access_token_ttl_seconds
    }

    #[must_use]
    pub fn refresh_token_ttl_seconds(&self) -> u64 {
        self.refresh_token_ttl_seconds
    }

    #[must_use]
    pub fn issue_attempts(&self) -> u32 {
        self.issue_attempts.max(1)
    }

    #[must_use]
    pub fn throttle(&self) -> ThrottlePolicy {
        self.throttle
    }

    #[must_use]
    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_secs(self.cleanup_grace_seconds)
    }

    /// How long secrets and token memberships are kept: the longest token
    /// lifetime plus the cleanup grace, so an expired token still reads as
    /// expired rather than revoked.
    #[must_use]
    pub fn retention(&self) -> Duration {
        self.access_token_ttl().max(self.refresh_token_ttl()) + self.cleanup_grace()
    }
}
