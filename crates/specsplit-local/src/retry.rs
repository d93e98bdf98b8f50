//! Retry policy and failure-streak bookkeeping for model calls.
//!
//! The numbers here are pure functions of the attempt index and the recorded
//! streak so they can be tested without a clock; `AiClient` owns the sleeping.

use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per call for `AiClient::call_default`.
    pub max_retries: u32,
    /// Streak length at which the pre-call cooldown kicks in.
    pub cooldown_threshold: u32,
    pub cooldown_base: Duration,
    pub cooldown_cap: Duration,
    pub backoff_cap: Duration,
    /// Jitter is drawn uniformly from `[0, jitter_ratio * base_delay]`.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            cooldown_threshold: 3,
            cooldown_base: Duration::from_secs(5),
            cooldown_cap: Duration::from_secs(60),
            backoff_cap: Duration::from_secs(30),
            jitter_ratio: 0.3,
        }
    }
}

impl RetryPolicy {
    /// Base delay before attempt `attempt` (0-based). Attempt 0 never waits.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let secs = 2u64.saturating_pow(attempt.min(32));
        Duration::from_secs(secs).min(self.backoff_cap)
    }

    /// Base delay plus `unit * jitter_ratio * base`, `unit` in `[0, 1]`.
    pub fn backoff_with_unit(&self, attempt: u32, unit: f64) -> Duration {
        let base = self.base_delay(attempt);
        let ratio = self.jitter_ratio.max(0.0);
        base + base.mul_f64(unit.clamp(0.0, 1.0) * ratio)
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let unit = rand::rng().random_range(0.0..=1.0);
        self.backoff_with_unit(attempt, unit)
    }

    /// Full cooldown window for a given streak, or `None` below the threshold.
    pub fn cooldown_for(&self, consecutive_failures: u32) -> Option<Duration> {
        if consecutive_failures < self.cooldown_threshold {
            return None;
        }
        let factor = 2u32.saturating_pow(consecutive_failures.min(31));
        Some(self.cooldown_base.saturating_mul(factor).min(self.cooldown_cap))
    }
}

/// Failure streak of one client. Reset on any successful call.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    pub consecutive_failures: u32,
    pub last_failure: Option<Instant>,
}

impl RetryState {
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn record_rate_limit(&mut self, at: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure = Some(at);
    }

    /// Time still to wait at `now` before the next call may go out.
    pub fn remaining_cooldown(&self, policy: &RetryPolicy, now: Instant) -> Option<Duration> {
        let window = policy.cooldown_for(self.consecutive_failures)?;
        let last = self.last_failure?;
        let elapsed = now.saturating_duration_since(last);
        if elapsed >= window {
            None
        } else {
            Some(window - elapsed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_delay_doubles_and_caps() {
        let p = RetryPolicy::default();
        assert_eq!(p.base_delay(0), Duration::ZERO);
        assert_eq!(p.base_delay(1), Duration::from_secs(2));
        assert_eq!(p.base_delay(2), Duration::from_secs(4));
        assert_eq!(p.base_delay(4), Duration::from_secs(16));
        assert_eq!(p.base_delay(5), Duration::from_secs(30));
        assert_eq!(p.base_delay(40), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_ratio() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff_with_unit(2, 0.0), Duration::from_secs(4));
        assert_eq!(p.backoff_with_unit(2, 1.0), Duration::from_millis(5200));
        for _ in 0..100 {
            let d = p.backoff(3);
            assert!(d >= Duration::from_secs(8));
            assert!(d <= Duration::from_millis(10_400));
        }
    }

    #[test]
    fn cooldown_starts_at_threshold_and_caps() {
        let p = RetryPolicy::default();
        assert_eq!(p.cooldown_for(2), None);
        assert_eq!(p.cooldown_for(3), Some(Duration::from_secs(40)));
        assert_eq!(p.cooldown_for(4), Some(Duration::from_secs(60)));
        assert_eq!(p.cooldown_for(100), Some(Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_cooldown_shrinks_with_time() {
        let p = RetryPolicy::default();
        let mut s = RetryState::default();
        let t0 = Instant::now();
        for _ in 0..3 {
            s.record_rate_limit(t0);
        }
        assert_eq!(s.remaining_cooldown(&p, t0), Some(Duration::from_secs(40)));
        assert_eq!(
            s.remaining_cooldown(&p, t0 + Duration::from_secs(15)),
            Some(Duration::from_secs(25))
        );
        assert_eq!(s.remaining_cooldown(&p, t0 + Duration::from_secs(40)), None);

        s.record_success();
        assert_eq!(s.remaining_cooldown(&p, t0), None);
    }
}
