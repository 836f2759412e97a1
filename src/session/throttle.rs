//! Failed-login throttle.
//!
//! Flow Overview:
//! 1) Every incorrect password appends `{user_id, ip, created_at}` to the window
//!    of its entity kind.
//! 2) A login is blocked when the same `(user_id, ip, entity)` triple has
//!    `max_attempts` failures younger than `window`.
//! 3) Old records are pruned after each failure, never on a timer.
//!
//! Scaling: the windows live in process memory behind a mutex. Several instances
//! behind a load balancer each keep their own count; a shared backend needs a
//! different `LoginThrottle` implementation. IP-only limiting is out of scope
//! here and belongs to the edge.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

use super::entity::EntityKind;

const DEFAULT_WINDOW: Duration = Duration::from_secs(15 * 60);
const DEFAULT_MAX_ATTEMPTS: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThrottlePolicy {
    window: Duration,
    max_attempts: usize,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ThrottlePolicy {
    #[must_use]
    pub fn new(window: Duration, max_attempts: usize) -> Self {
        Self {
            window,
            max_attempts,
        }
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    #[must_use]
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }
}

/// Throttle consulted by the credential verifier.
pub trait LoginThrottle: Send + Sync {
    fn record_failure(&self, user_id: i64, ip: &str, entity: EntityKind);
    fn is_blocked(&self, user_id: i64, ip: &str, entity: EntityKind) -> bool;
    fn prune(&self);
}

#[derive(Clone, Debug)]
struct AttemptRecord {
    user_id: i64,
    ip: String,
    created_at: Instant,
}

impl AttemptRecord {
    fn matches(&self, user_id: i64, ip: &str) -> bool {
        self.user_id == user_id && self.ip == ip
    }

    fn is_recent(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.created_at) < window
    }
}

#[derive(Debug, Default)]
pub struct SlidingWindowThrottle {
    policy: ThrottlePolicy,
    windows: Mutex<HashMap<EntityKind, Vec<AttemptRecord>>>,
}

impl SlidingWindowThrottle {
    #[must_use]
    pub fn new(policy: ThrottlePolicy) -> Self {
        Self {
            policy,
            windows: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn policy(&self) -> &ThrottlePolicy {
        &self.policy
    }

    fn windows(&self) -> MutexGuard<'_, HashMap<EntityKind, Vec<AttemptRecord>>> {
        // Records are pushed or retained whole; a poisoned guard is still consistent.
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn record_failure_at(
        &self,
        user_id: i64,
        ip: &str,
        entity: EntityKind,
        now: Instant,
    ) {
        self.windows()
            .entry(entity)
            .or_default()
            .push(AttemptRecord {
                user_id,
                ip: ip.to_string(),
                created_at: now,
            });
        self.prune_at(now);
        debug!(%entity, user_id, "recorded failed login attempt");
    }

    pub(crate) fn is_blocked_at(
        &self,
        user_id: i64,
        ip: &str,
        entity: EntityKind,
        now: Instant,
    ) -> bool {
        let windows = self.windows();
        let Some(records) = windows.get(&entity) else {
            return false;
        };
        let recent = records
            .iter()
            .filter(|record| record.matches(user_id, ip) && record.is_recent(now, self.policy.window))
            .count();
        recent >= self.policy.max_attempts
    }

    pub(crate) fn prune_at(&self, now: Instant) {
        let window = self.policy.window;
        let mut windows = self.windows();
        for records in windows.values_mut() {
            records.retain(|record| record.is_recent(now, window));
        }
        windows.retain(|_, records| !records.is_empty());
    }

    /// Number of records currently held, across entity kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.windows().values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LoginThrottle for SlidingWindowThrottle {
    fn record_failure(&self, user_id: i64, ip: &str, entity: EntityKind) {
        self.record_failure_at(user_id, ip, entity, Instant::now());
    }

    fn is_blocked(&self, user_id: i64, ip: &str, entity: EntityKind) -> bool {
        self.is_blocked_at(user_id, ip, entity, Instant::now())
    }

    fn prune(&self) {
        self.prune_at(Instant::now());
    }
}
