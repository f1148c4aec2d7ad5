//! Rate limiting for code issuance and verification.
//!
//! Flow Overview:
//! 1) Issuance is limited per email from the code store's own history: at most
//!    `max_requests` codes per `time_window`, and a `cooldown` between codes.
//! 2) Verification is limited per client address with an in-process counter:
//!    after `max_attempts` calls inside `time_window` the address is locked out
//!    for `lockout_duration`, and locked calls never reach storage.
//!
//! Scaling: verification counters live in one process. Multi-instance
//! deployments get a per-instance soft limit unless a shared `CounterStore`
//! is injected.
use super::clock::{Clock, ceil_secs, duration_ms};
use super::store::CodeStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_ISSUE_WINDOW: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_ISSUE_MAX_REQUESTS: u32 = 3;
pub const DEFAULT_ISSUE_COOLDOWN: Duration = Duration::from_secs(60);
pub const DEFAULT_VERIFY_WINDOW: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_VERIFY_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_VERIFY_LOCKOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited { retry_after_secs: u64 },
}

impl RateLimitDecision {
    #[must_use]
    pub fn is_limited(&self) -> bool {
        matches!(self, Self::Limited { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IssuancePolicy {
    time_window: Duration,
    max_requests: u32,
    cooldown: Duration,
}

impl IssuancePolicy {
    /// Default policy: 3 codes per 5 minutes, 60 seconds between codes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            time_window: DEFAULT_ISSUE_WINDOW,
            max_requests: DEFAULT_ISSUE_MAX_REQUESTS,
            cooldown: DEFAULT_ISSUE_COOLDOWN,
        }
    }

    #[must_use]
    pub fn with_time_window(mut self, time_window: Duration) -> Self {
        self.time_window = time_window;
        self
    }

    #[must_use]
    pub fn with_max_requests(mut self, max_requests: u32) -> Self {
        self.max_requests = max_requests;
        self
    }

    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    #[must_use]
    pub fn time_window(&self) -> Duration {
        self.time_window
    }

    #[must_use]
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    #[must_use]
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}

impl Default for IssuancePolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VerificationPolicy {
    time_window: Duration,
    max_attempts: u32,
    lockout_duration: Duration,
}

impl VerificationPolicy {
    /// Default policy: 10 calls per 15 minutes, then a 30 minute lockout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            time_window: DEFAULT_VERIFY_WINDOW,
            max_attempts: DEFAULT_VERIFY_MAX_ATTEMPTS,
            lockout_duration: DEFAULT_VERIFY_LOCKOUT,
        }
    }

    #[must_use]
    pub fn with_time_window(mut self, time_window: Duration) -> Self {
        self.time_window = time_window;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_lockout_duration(mut self, lockout_duration: Duration) -> Self {
        self.lockout_duration = lockout_duration;
        self
    }

    #[must_use]
    pub fn time_window(&self) -> Duration {
        self.time_window
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn lockout_duration(&self) -> Duration {
        self.lockout_duration
    }
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-email issuance limiter backed by the code store's history.
pub struct IssuanceLimiter {
    policy: IssuancePolicy,
    clock: Arc<dyn Clock>,
}

impl IssuanceLimiter {
    #[must_use]
    pub fn new(policy: IssuancePolicy, clock: Arc<dyn Clock>) -> Self {
        Self { policy, clock }
    }

    #[must_use]
    pub fn policy(&self) -> IssuancePolicy {
        self.policy
    }

    /// Decide whether `email` may receive another code now.
    ///
    /// Storage failures allow the request.
    pub async fn check(&self, store: &CodeStore, email: &str) -> RateLimitDecision {
        let stats = match store.rate_limit_info(email, self.policy.time_window).await {
            Ok(stats) => stats,
            Err(err) => {
                warn!("Issuance rate limit check failed, allowing request: {err}");
                return RateLimitDecision::Allowed;
            }
        };

        let now = self.clock.now_ms();
        let mut wait_ms: i64 = 0;

        if stats.count >= u64::from(self.policy.max_requests) {
            if let Some(first) = stats.first_request_at {
                let window_ends = first.saturating_add(duration_ms(self.policy.time_window));
                wait_ms = wait_ms.max(window_ends.saturating_sub(now));
            }
        }

        if let Some(last) = stats.last_request_at {
            let cooldown_ends = last.saturating_add(duration_ms(self.policy.cooldown));
            wait_ms = wait_ms.max(cooldown_ends.saturating_sub(now));
        }

        if wait_ms > 0 {
            debug!(count = stats.count, wait_ms, "issuance rate limited");
            RateLimitDecision::Limited {
                retry_after_secs: ceil_secs(wait_ms).max(1),
            }
        } else {
            RateLimitDecision::Allowed
        }
    }
}

/// Counter for one client address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CounterState {
    pub count: u32,
    pub window_started_at: i64,
    pub locked_until: Option<i64>,
}

/// Storage for verification counters. Swap in a shared implementation to
/// enforce limits across processes.
pub trait CounterStore: Send + Sync {
    fn get(&self, key: &str) -> Option<CounterState>;

    /// Count one call against `policy` as a single atomic step: reject while
    /// locked, open a new window when the old one ended, lock out once
    /// `max_attempts` calls were already made in the window.
    fn hit(&self, key: &str, now_ms: i64, policy: &VerificationPolicy) -> RateLimitDecision;

    fn clear(&self, key: &str);

    /// Drop entries whose window and lockout both ended before `now_ms`.
    fn expire(&self, now_ms: i64, window_ms: i64) -> usize;
}

#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, CounterState>>,
}

impl MemoryCounterStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CounterStore for MemoryCounterStore {
    fn get(&self, key: &str) -> Option<CounterState> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
    }

    fn hit(&self, key: &str, now_ms: i64, policy: &VerificationPolicy) -> RateLimitDecision {
        let fresh = CounterState {
            count: 0,
            window_started_at: now_ms,
            locked_until: None,
        };
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.entry(key.to_string()).or_insert(fresh);

        match entry.locked_until {
            Some(until) if until > now_ms => {
                return RateLimitDecision::Limited {
                    retry_after_secs: ceil_secs(until - now_ms).max(1),
                };
            }
            Some(_) => *entry = fresh,
            None => {}
        }

        if now_ms.saturating_sub(entry.window_started_at) >= duration_ms(policy.time_window) {
            *entry = fresh;
        }

        if entry.count >= policy.max_attempts {
            let lockout_ms = duration_ms(policy.lockout_duration);
            entry.locked_until = Some(now_ms.saturating_add(lockout_ms));
            warn!(client = key, "verification lockout triggered");
            return RateLimitDecision::Limited {
                retry_after_secs: ceil_secs(lockout_ms).max(1),
            };
        }

        entry.count = entry.count.saturating_add(1);
        RateLimitDecision::Allowed
    }

    fn clear(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    fn expire(&self, now_ms: i64, window_ms: i64) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, state| {
            let window_open = now_ms.saturating_sub(state.window_started_at) < window_ms;
            let locked = state.locked_until.is_some_and(|until| until > now_ms);
            window_open || locked
        });
        before - entries.len()
    }
}

/// Per-client-address verification limiter.
pub struct VerificationLimiter {
    policy: VerificationPolicy,
    counters: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl VerificationLimiter {
    #[must_use]
    pub fn new(
        policy: VerificationPolicy,
        counters: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            policy,
            counters,
            clock,
        }
    }

    #[must_use]
    pub fn policy(&self) -> VerificationPolicy {
        self.policy
    }

    /// Count a verification call from `client`. Calls without an address are not limited.
    pub fn check(&self, client: Option<&str>) -> RateLimitDecision {
        let Some(key) = client else {
            return RateLimitDecision::Allowed;
        };

        self.counters.hit(key, self.clock.now_ms(), &self.policy)
    }

    /// Reset the counter after a successful verification.
    pub fn record_success(&self, client: Option<&str>) {
        if let Some(key) = client {
            self.counters.clear(key);
        }
    }

    /// Drop idle counters; returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.counters
            .expire(self.clock.now_ms(), duration_ms(self.policy.time_window))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::otp::clock::ManualClock;
    use crate::otp::code::{CodeHasher, HashParams};
    use crate::otp::models::Provenance;
    use crate::otp::store::MemoryBackend;
    use anyhow::Result;

    const CLIENT: Option<&str> = Some("203.0.113.7");

    fn verification() -> (VerificationLimiter, Arc<ManualClock>, Arc<MemoryCounterStore>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let counters = Arc::new(MemoryCounterStore::new());
        let limiter =
            VerificationLimiter::new(VerificationPolicy::new(), counters.clone(), clock.clone());
        (limiter, clock, counters)
    }

    fn store(clock: Arc<ManualClock>) -> CodeStore {
        let hasher =
            CodeHasher::new(HashParams::new().with_memory_kib(8).with_iterations(1)).unwrap();
        CodeStore::new(Arc::new(MemoryBackend::new()), hasher, clock)
    }

    #[test]
    fn policy_defaults() {
        let issue = IssuancePolicy::default();
        assert_eq!(issue.time_window(), Duration::from_secs(300));
        assert_eq!(issue.max_requests(), 3);
        assert_eq!(issue.cooldown(), Duration::from_secs(60));

        let verify = VerificationPolicy::default();
        assert_eq!(verify.time_window(), Duration::from_secs(900));
        assert_eq!(verify.max_attempts(), 10);
        assert_eq!(verify.lockout_duration(), Duration::from_secs(1800));
    }

    #[test]
    fn eleventh_call_triggers_lockout() {
        let (limiter, clock, _counters) = verification();
        for _ in 0..10 {
            assert_eq!(limiter.check(CLIENT), RateLimitDecision::Allowed);
            clock.advance(Duration::from_secs(1));
        }

        assert_eq!(
            limiter.check(CLIENT),
            RateLimitDecision::Limited {
                retry_after_secs: 1800
            }
        );

        clock.advance(Duration::from_secs(60));
        assert_eq!(
            limiter.check(CLIENT),
            RateLimitDecision::Limited {
                retry_after_secs: 1740
            }
        );
    }

    #[test]
    fn lockout_expires() {
        let (limiter, clock, _counters) = verification();
        for _ in 0..11 {
            limiter.check(CLIENT);
        }
        assert!(limiter.check(CLIENT).is_limited());

        clock.advance(Duration::from_secs(30 * 60 + 1));
        assert_eq!(limiter.check(CLIENT), RateLimitDecision::Allowed);
    }

    #[test]
    fn window_rolls_over() {
        let (limiter, clock, counters) = verification();
        for _ in 0..10 {
            limiter.check(CLIENT);
        }
        clock.advance(Duration::from_secs(15 * 60));
        assert_eq!(limiter.check(CLIENT), RateLimitDecision::Allowed);
        assert_eq!(counters.get("203.0.113.7").map(|s| s.count), Some(1));
    }

    #[test]
    fn unknown_client_is_not_limited() {
        let (limiter, _clock, counters) = verification();
        for _ in 0..50 {
            assert_eq!(limiter.check(None), RateLimitDecision::Allowed);
        }
        assert!(counters.is_empty());
    }

    #[test]
    fn success_clears_counter() {
        let (limiter, _clock, counters) = verification();
        for _ in 0..9 {
            limiter.check(CLIENT);
        }
        limiter.record_success(CLIENT);
        assert!(counters.is_empty());
        for _ in 0..10 {
            assert_eq!(limiter.check(CLIENT), RateLimitDecision::Allowed);
        }
    }

    #[test]
    fn sweep_drops_idle_entries_but_keeps_lockouts() {
        let (limiter, clock, counters) = verification();
        limiter.check(Some("198.51.100.1"));
        for _ in 0..11 {
            limiter.check(CLIENT);
        }
        clock.advance(Duration::from_secs(16 * 60));

        assert_eq!(limiter.sweep(), 1);
        assert_eq!(counters.len(), 1);

        clock.advance(Duration::from_secs(15 * 60));
        assert_eq!(limiter.sweep(), 1);
        assert!(counters.is_empty());
    }

    #[test]
    fn concurrent_calls_never_exceed_max_attempts() {
        let (limiter, _clock, _counters) = verification();
        let allowed = std::sync::atomic::AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..5 {
                        if !limiter.check(CLIENT).is_limited() {
                            allowed.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(allowed.into_inner(), 10);
        assert!(limiter.check(CLIENT).is_limited());
    }

    #[tokio::test]
    async fn issuance_cooldown_blocks_second_request() -> Result<()> {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = store(clock.clone());
        let limiter = IssuanceLimiter::new(IssuancePolicy::new(), clock.clone());
        let email = "fan@example.com";

        assert_eq!(limiter.check(&store, email).await, RateLimitDecision::Allowed);
        store
            .issue(email, "123456", Duration::from_secs(300), Provenance::default())
            .await?;

        clock.advance(Duration::from_millis(10_500));
        assert_eq!(
            limiter.check(&store, email).await,
            RateLimitDecision::Limited {
                retry_after_secs: 50
            }
        );

        clock.advance(Duration::from_secs(50));
        assert_eq!(limiter.check(&store, email).await, RateLimitDecision::Allowed);
        Ok(())
    }

    #[tokio::test]
    async fn issuance_window_cap_uses_oldest_request() -> Result<()> {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = store(clock.clone());
        let limiter = IssuanceLimiter::new(IssuancePolicy::new(), clock.clone());
        let email = "fan@example.com";

        for code in ["111111", "222222", "333333"] {
            store
                .issue(email, code, Duration::from_secs(300), Provenance::default())
                .await?;
            clock.advance(Duration::from_secs(61));
        }

        // Three codes issued at t=0, 61, 122; now t=183, window ends at t=300.
        assert_eq!(
            limiter.check(&store, email).await,
            RateLimitDecision::Limited {
                retry_after_secs: 117
            }
        );

        clock.advance(Duration::from_secs(117));
        assert_eq!(limiter.check(&store, email).await, RateLimitDecision::Allowed);
        Ok(())
    }
}
