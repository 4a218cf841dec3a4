use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Exponential retry delays with a ceiling and random spread.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    initial_ms: u64,
    max_ms: u64,
    multiplier: f64,
    jitter_ratio: f64,
}

impl Backoff {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            initial_ms: config.initial_backoff_ms,
            max_ms: config.max_backoff_ms.max(config.initial_backoff_ms),
            multiplier: config.multiplier.max(1.0),
            jitter_ratio: config.jitter_ratio.clamp(0.0, 1.0),
        }
    }

    /// Capped delay after the `attempt`-th failure (1-based), before jitter.
    pub fn base_delay_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let grown = self.initial_ms as f64 * self.multiplier.powi(exponent);
        if grown.is_finite() {
            grown.min(self.max_ms as f64) as u64
        } else {
            self.max_ms
        }
    }

    /// Delay to wait after the `attempt`-th failure. Jitter only shortens the
    /// base delay, so the ceiling holds.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms(attempt);
        let spread = (base as f64 * self.jitter_ratio) as u64;
        let jitter = if spread == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=spread)
        };
        Duration::from_millis(base - jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff(initial: u64, max: u64, multiplier: f64, jitter: f64) -> Backoff {
        Backoff::from_config(&RetryConfig {
            max_attempts: 5,
            initial_backoff_ms: initial,
            max_backoff_ms: max,
            multiplier,
            jitter_ratio: jitter,
        })
    }

    #[test]
    fn delays_grow_and_cap() {
        let b = backoff(100, 1_000, 2.0, 0.0);
        assert_eq!(b.base_delay_ms(1), 100);
        assert_eq!(b.base_delay_ms(2), 200);
        assert_eq!(b.base_delay_ms(4), 800);
        assert_eq!(b.base_delay_ms(5), 1_000);
        assert_eq!(b.base_delay_ms(u32::MAX), 1_000);
        assert_eq!(b.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn jitter_stays_within_spread() {
        let b = backoff(1_000, 1_000, 2.0, 0.25);
        for _ in 0..100 {
            let delay = b.delay_for(3);
            assert!(delay >= Duration::from_millis(750), "{delay:?}");
            assert!(delay <= Duration::from_millis(1_000), "{delay:?}");
        }
    }

    #[test]
    fn fixed_config_is_constant() {
        let b = Backoff::from_config(&RetryConfig::fixed(3, 50));
        for attempt in 1..10 {
            assert_eq!(b.delay_for(attempt), Duration::from_millis(50));
        }
    }
}
