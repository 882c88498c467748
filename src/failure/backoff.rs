//! Exponential backoff curve.
//!
//! Base-4 growth in the retry count, bounded at roughly 25 hours, with
//! ±10% jitter so synchronized failures do not requeue in lockstep.

use std::time::Duration;

use rand::Rng;

/// Upper bound on the requeue delay (~25 hours).
pub const MAX_DELAY_SECS: u64 = 90_000;

/// Jitter applied around the deterministic curve.
const JITTER_FACTOR: f64 = 0.10;

/// Deterministic backoff curve: `4^retry_count` seconds, capped.
///
/// Monotonically non-decreasing, and strictly positive from retry 0.
pub fn base_delay_secs(retry_count: u64) -> u64 {
    let exponent = retry_count.min(16) as u32;
    4u64.checked_pow(exponent)
        .map(|secs| secs.min(MAX_DELAY_SECS))
        .unwrap_or(MAX_DELAY_SECS)
}

/// Jittered delay for a retry. Never below one second.
pub fn delay(retry_count: u64) -> Duration {
    let base = base_delay_secs(retry_count) as f64;
    let jitter = rand::thread_rng().gen_range(1.0 - JITTER_FACTOR..=1.0 + JITTER_FACTOR);
    Duration::from_secs_f64((base * jitter).max(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn first_retry_waits_a_positive_delay() {
        assert!(base_delay_secs(0) > 0);
        assert!(delay(0) >= Duration::from_secs(1));
    }

    #[test]
    fn curve_is_capped() {
        assert_eq!(base_delay_secs(9), MAX_DELAY_SECS);
        assert_eq!(base_delay_secs(64), MAX_DELAY_SECS);
    }

    #[test]
    fn jitter_stays_within_envelope() {
        for retry in 0..12 {
            let base = base_delay_secs(retry) as f64;
            for _ in 0..50 {
                let jittered = delay(retry).as_secs_f64();
                assert!(jittered >= (base * (1.0 - JITTER_FACTOR)).max(1.0) - f64::EPSILON);
                assert!(jittered <= base * (1.0 + JITTER_FACTOR) + f64::EPSILON);
            }
        }
    }

    proptest! {
        #[test]
        fn curve_is_monotonically_non_decreasing(a in 0u64..80, b in 0u64..80) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(base_delay_secs(lo) <= base_delay_secs(hi));
        }
    }
}
