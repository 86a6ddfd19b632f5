//! Capped exponential backoff with jitter for upstream retries.

use std::time::Duration;
use rand::Rng;

/// Delay before retry number `failures` (1-based).
///
/// Doubles `base` per consecutive failure, caps at `base * max_multiplier`,
/// then adds 0-10% jitter.
pub fn error_backoff(failures: u32, base: Duration, max_multiplier: u32) -> Duration {
    if failures == 0 || base.is_zero() {
        return Duration::ZERO;
    }

    let base_ms = base.as_millis() as u64;
    let factor = 2u64.saturating_pow(failures - 1);
    let cap_ms = base_ms.saturating_mul(u64::from(max_multiplier.max(1)));
    let delay_ms = base_ms.saturating_mul(factor).min(cap_ms);

    let jitter_range = delay_ms / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(delay_ms + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_growth_and_cap() {
        let base = Duration::from_millis(100);

        let first = error_backoff(1, base, 10);
        assert!(first >= Duration::from_millis(100));
        assert!(first < Duration::from_millis(110));

        let second = error_backoff(2, base, 10);
        assert!(second >= Duration::from_millis(200));

        let capped = error_backoff(30, base, 10);
        assert!(capped >= Duration::from_millis(1000));
        assert!(capped < Duration::from_millis(1100));
    }

    #[test]
    fn test_no_failures_no_delay() {
        assert_eq!(error_backoff(0, Duration::from_millis(100), 10), Duration::ZERO);
        assert_eq!(error_backoff(3, Duration::ZERO, 10), Duration::ZERO);
    }
}
