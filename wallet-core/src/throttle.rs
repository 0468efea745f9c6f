use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Consecutive failures tolerated before an identifier is locked out.
pub const MAX_ATTEMPTS: u32 = 5;
/// How long a locked-out identifier stays locked after its last failure.
pub const LOCKOUT_DURATION: Duration = Duration::from_secs(15 * 60);
/// Lifetime of an unlocked session.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlePolicy {
    pub max_attempts: u32,
    pub lockout_duration: Duration,
    pub session_timeout: Duration,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            lockout_duration: LOCKOUT_DURATION,
            session_timeout: SESSION_TIMEOUT,
        }
    }
}

/// Result of consulting the guard before an unlock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptCheck {
    pub allowed: bool,
    pub remaining: u32,
    /// Seconds until the lockout window closes, when locked out.
    pub retry_after_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
struct AttemptRecord {
    failure_count: u32,
    last_failure_at: Instant,
}

#[derive(Debug, Default)]
struct ThrottleState {
    attempts: HashMap<String, AttemptRecord>,
    /// Session start times, checked against `session_timeout` by elapsed time.
    sessions: HashMap<String, Instant>,
}

/// Brute-force defense and session lifetime tracking, keyed by identifier.
///
/// Per identifier: `Clear -> Accumulating(n) -> LockedOut -> Clear`. Expiry is
/// lazy: stale attempt records and sessions are purged when next consulted.
#[derive(Debug)]
pub struct ThrottleGuard {
    policy: ThrottlePolicy,
    state: Mutex<ThrottleState>,
}

impl ThrottleGuard {
    pub fn new(policy: ThrottlePolicy) -> Self {
        Self {
            policy: ThrottlePolicy {
                max_attempts: policy.max_attempts.max(1),
                ..policy
            },
            state: Mutex::new(ThrottleState::default()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ThrottlePolicy::default())
    }

    pub fn policy(&self) -> &ThrottlePolicy {
        &self.policy
    }

    pub fn check_attempt(&self, id: &str) -> AttemptCheck {
        let mut state = self.state.lock();
        let now = Instant::now();

        let record = match state.attempts.get(id) {
            Some(record) => *record,
            None => return self.fresh_budget(),
        };

        let elapsed = now.saturating_duration_since(record.last_failure_at);
        if elapsed > self.policy.lockout_duration {
            state.attempts.remove(id);
            return self.fresh_budget();
        }

        let allowed = record.failure_count < self.policy.max_attempts;
        let retry_after_secs = if allowed {
            None
        } else {
            Some(
                self.policy
                    .lockout_duration
                    .saturating_sub(elapsed)
                    .as_secs(),
            )
        };

        AttemptCheck {
            allowed,
            remaining: self.policy.max_attempts.saturating_sub(record.failure_count),
            retry_after_secs,
        }
    }

    /// Record the outcome of an attempt. The cap itself is enforced by
    /// callers consulting [`ThrottleGuard::check_attempt`] first.
    pub fn record_attempt(&self, id: &str, success: bool) {
        let mut state = self.state.lock();
        if success {
            state.attempts.remove(id);
            return;
        }

        let now = Instant::now();
        let record = state
            .attempts
            .entry(id.to_string())
            .or_insert(AttemptRecord {
                failure_count: 0,
                last_failure_at: now,
            });
        record.failure_count = record.failure_count.saturating_add(1);
        record.last_failure_at = now;

        if record.failure_count >= self.policy.max_attempts {
            log::warn!(
                "Identifier '{}' locked out after {} failed attempts",
                id,
                record.failure_count
            );
        }
    }

    pub fn start_session(&self, id: &str) {
        self.state
            .lock()
            .sessions
            .insert(id.to_string(), Instant::now());
    }

    /// Purges the session once it has expired.
    pub fn is_session_valid(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        match state.sessions.get(id) {
            Some(started) if self.within_timeout(*started) => true,
            Some(_) => {
                state.sessions.remove(id);
                false
            }
            None => false,
        }
    }

    /// Like [`ThrottleGuard::is_session_valid`] but leaves expired sessions
    /// in place.
    pub fn peek_session_valid(&self, id: &str) -> bool {
        self.state
            .lock()
            .sessions
            .get(id)
            .is_some_and(|started| self.within_timeout(*started))
    }

    pub fn has_session(&self, id: &str) -> bool {
        self.state.lock().sessions.contains_key(id)
    }

    pub fn clear_session(&self, id: &str) {
        self.state.lock().sessions.remove(id);
    }

    fn within_timeout(&self, started: Instant) -> bool {
        Instant::now().saturating_duration_since(started) <= self.policy.session_timeout
    }

    fn fresh_budget(&self) -> AttemptCheck {
        AttemptCheck {
            allowed: true,
            remaining: self.policy.max_attempts,
            retry_after_secs: None,
        }
    }
}

impl Default for ThrottleGuard {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_policy() -> ThrottlePolicy {
        ThrottlePolicy {
            max_attempts: 5,
            lockout_duration: Duration::from_millis(40),
            session_timeout: Duration::from_millis(20),
        }
    }

    #[test]
    fn unknown_identifier_has_full_budget() {
        let guard = ThrottleGuard::with_defaults();
        let check = guard.check_attempt("wallet");
        assert!(check.allowed);
        assert_eq!(check.remaining, MAX_ATTEMPTS);
        assert_eq!(check.retry_after_secs, None);
    }

    #[test]
    fn failures_accumulate_until_lockout() {
        let guard = ThrottleGuard::with_defaults();
        for expected_remaining in (1..MAX_ATTEMPTS).rev() {
            guard.record_attempt("wallet", false);
            let check = guard.check_attempt("wallet");
            assert!(check.allowed);
            assert_eq!(check.remaining, expected_remaining);
        }

        guard.record_attempt("wallet", false);
        let check = guard.check_attempt("wallet");
        assert!(!check.allowed);
        assert_eq!(check.remaining, 0);
        assert!(check.retry_after_secs.is_some());
    }

    #[test]
    fn lockout_expires_with_fresh_budget() {
        let guard = ThrottleGuard::new(short_policy());
        for _ in 0..5 {
            guard.record_attempt("wallet", false);
        }
        assert!(!guard.check_attempt("wallet").allowed);

        std::thread::sleep(Duration::from_millis(60));
        let check = guard.check_attempt("wallet");
        assert!(check.allowed);
        assert_eq!(check.remaining, 5);
    }

    #[test]
    fn success_clears_failures() {
        let guard = ThrottleGuard::with_defaults();
        guard.record_attempt("wallet", false);
        guard.record_attempt("wallet", false);
        guard.record_attempt("wallet", true);
        assert_eq!(guard.check_attempt("wallet").remaining, MAX_ATTEMPTS);
    }

    #[test]
    fn identifiers_are_tracked_independently() {
        let guard = ThrottleGuard::with_defaults();
        for _ in 0..MAX_ATTEMPTS {
            guard.record_attempt("wallet", false);
        }
        assert!(!guard.check_attempt("wallet").allowed);
        assert!(guard.check_attempt("other").allowed);
    }

    #[test]
    fn session_expires_lazily() {
        let guard = ThrottleGuard::new(short_policy());
        assert!(!guard.is_session_valid("wallet"));

        guard.start_session("wallet");
        assert!(guard.is_session_valid("wallet"));

        std::thread::sleep(Duration::from_millis(30));
        assert!(!guard.is_session_valid("wallet"));
        assert!(!guard.is_session_valid("wallet"));
    }

    #[test]
    fn peek_leaves_expired_session_recorded() {
        let guard = ThrottleGuard::new(short_policy());
        guard.start_session("wallet");
        assert!(guard.peek_session_valid("wallet"));

        std::thread::sleep(Duration::from_millis(30));
        assert!(!guard.peek_session_valid("wallet"));
        assert!(guard.has_session("wallet"));

        assert!(!guard.is_session_valid("wallet"));
        assert!(!guard.has_session("wallet"));
    }

    #[test]
    fn huge_timeouts_do_not_overflow() {
        let guard = ThrottleGuard::new(ThrottlePolicy {
            max_attempts: 1,
            lockout_duration: Duration::MAX,
            session_timeout: Duration::MAX,
        });
        guard.start_session("wallet");
        assert!(guard.is_session_valid("wallet"));
        assert!(guard.peek_session_valid("wallet"));

        guard.record_attempt("wallet", false);
        let check = guard.check_attempt("wallet");
        assert!(!check.allowed);
        assert!(check.retry_after_secs.is_some());
    }

    #[test]
    fn clear_session_invalidates() {
        let guard = ThrottleGuard::with_defaults();
        guard.start_session("wallet");
        guard.clear_session("wallet");
        assert!(!guard.is_session_valid("wallet"));
    }
}
