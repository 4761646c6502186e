//! Exponential backoff with uniform jitter for event stream reconnects.

use std::time::Duration;

use rand::Rng;

/// Fractional jitter applied to every delay: ±25%.
const JITTER: f64 = 0.25;

#[derive(Debug)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            attempt: 0,
        }
    }

    /// Next delay: `min(min * 2^attempt, max)` perturbed by ±25% uniform
    /// jitter. Advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        let factor = rand::thread_rng().gen_range(1.0 - JITTER..=1.0 + JITTER);
        base.mul_f64(factor)
    }

    /// Called after a successful reconnect so the next failure starts over.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    fn base_delay(&self, attempt: u32) -> Duration {
        // Cap the shift so the multiplication cannot overflow.
        let shift = attempt.min(32);
        let exp = self
            .min
            .saturating_mul(1u32.checked_shl(shift).unwrap_or(u32::MAX));
        exp.min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every delay in a failure streak of length n must fall inside
    /// [min * 2^(n-1) * 0.75, min(max, min * 2^(n-1)) * 1.25].
    #[test]
    fn test_delay_bounds_over_streak() {
        let min = Duration::from_secs(1);
        let max = Duration::from_secs(60);

        for _round in 0..50 {
            let mut backoff = Backoff::new(min, max);
            for n in 1u32..=10 {
                let delay = backoff.next_delay();
                let base = min
                    .saturating_mul(1u32 << (n - 1).min(31))
                    .min(max);
                let lo = base.mul_f64(1.0 - JITTER);
                let hi = base.mul_f64(1.0 + JITTER);
                assert!(
                    delay >= lo && delay <= hi,
                    "attempt {n}: {delay:?} outside [{lo:?}, {hi:?}]"
                );
            }
        }
    }

    #[test]
    fn test_delay_caps_at_max() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(8));
        for _ in 0..20 {
            let delay = backoff.next_delay();
            assert!(delay <= Duration::from_secs(8).mul_f64(1.0 + JITTER));
        }
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        let delay = backoff.next_delay();
        assert!(delay <= Duration::from_secs(1).mul_f64(1.0 + JITTER));
    }

    #[test]
    fn test_large_attempt_does_not_overflow() {
        let mut backoff = Backoff::new(Duration::from_secs(30), Duration::from_secs(60));
        for _ in 0..64 {
            let _ = backoff.next_delay();
        }
        let delay = backoff.next_delay();
        assert!(delay <= Duration::from_secs(60).mul_f64(1.0 + JITTER));
    }
}
