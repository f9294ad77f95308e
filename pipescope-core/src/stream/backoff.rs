//! Reconnect delays: exponential ceiling with full jitter.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

use crate::config::StreamConfig;

#[derive(Debug, Clone)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    attempt: u32,
    rng: StdRng,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self::with_rng(base, max, StdRng::from_entropy())
    }

    /// Deterministic jitter, for tests.
    pub fn with_rng(base: Duration, max: Duration, rng: StdRng) -> Self {
        let base_ms = base.as_millis().min(u64::MAX as u128) as u64;
        let max_ms = max.as_millis().min(u64::MAX as u128) as u64;
        Self {
            base_ms,
            max_ms: max_ms.max(base_ms),
            attempt: 0,
            rng,
        }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_max_ms),
        )
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Upper bound of the delay for a given attempt: `min(max, base * 2^attempt)`.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let factor = 1_u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_ms.saturating_mul(factor).min(self.max_ms))
    }

    /// Delay before the next reconnect, uniform in `[0, ceiling(attempt)]`.
    pub fn next_delay(&mut self) -> Duration {
        let ceiling = self.ceiling(self.attempt).as_millis() as u64;
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(self.rng.gen_range(0..=ceiling))
    }

    /// Call after a successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Backoff {
        Backoff::with_rng(
            Duration::from_secs(1),
            Duration::from_secs(30),
            StdRng::seed_from_u64(3),
        )
    }

    #[test]
    fn test_ceiling_doubles_then_caps() {
        let backoff = seeded();
        let ceilings: Vec<u64> = (0..8).map(|a| backoff.ceiling(a).as_secs()).collect();
        assert_eq!(ceilings, vec![1, 2, 4, 8, 16, 30, 30, 30]);
        assert_eq!(backoff.ceiling(200), Duration::from_secs(30));
    }

    #[test]
    fn test_jittered_delay_within_ceiling() {
        let mut backoff = seeded();
        for attempt in 0..40 {
            let ceiling = backoff.ceiling(attempt);
            let delay = backoff.next_delay();
            assert!(delay <= ceiling, "attempt {attempt}: {delay:?} > {ceiling:?}");
        }
        assert_eq!(backoff.attempt(), 40);
    }

    #[test]
    fn test_reset_starts_over() {
        let mut backoff = seeded();
        for _ in 0..5 {
            backoff.next_delay();
        }
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert!(backoff.next_delay() <= Duration::from_secs(1));
    }

    #[test]
    fn test_max_below_base_is_raised() {
        let backoff = Backoff::with_rng(
            Duration::from_secs(5),
            Duration::from_secs(1),
            StdRng::seed_from_u64(0),
        );
        assert_eq!(backoff.ceiling(3), Duration::from_secs(5));
    }
}
