//! # Jitter policy for worker deadlines.
//!
//! [`JitterPolicy`] adds randomness to per-worker deadlines so that a batch of
//! workers forked together does not hit its max-age at the same instant and
//! restart in lockstep.
//!
//! - [`JitterPolicy::None`]: no randomization, predictable deadlines
//! - [`JitterPolicy::Full`]: random offset in [0, spread] (lifecycle default)
//! - [`JitterPolicy::Equal`]: spread/2 + random[0, spread/2]
//!
//! Offsets are drawn at nanosecond resolution; two workers forked in the same
//! batch practically never share a deadline.

use std::time::Duration;

use rand::Rng;

/// Policy controlling randomization of worker deadlines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum JitterPolicy {
    /// No jitter: deadline equals the base.
    None,

    /// Full jitter: offset drawn uniformly from [0, spread].
    #[default]
    Full,

    /// Equal jitter: offset = spread/2 + random[0, spread/2].
    Equal,
}

impl JitterPolicy {
    /// Draws the random offset for the given spread.
    pub fn offset(&self, spread: Duration) -> Duration {
        let ns = nanos(spread);
        if ns == 0 {
            return Duration::ZERO;
        }
        match self {
            JitterPolicy::None => Duration::ZERO,
            JitterPolicy::Full => Duration::from_nanos(rand::rng().random_range(0..=ns)),
            JitterPolicy::Equal => {
                let half = ns / 2;
                let jitter = if half == 0 {
                    0
                } else {
                    rand::rng().random_range(0..=half)
                };
                Duration::from_nanos(half + jitter)
            }
        }
    }

    /// Returns `base` plus an offset drawn from `[0, spread]` according to the policy.
    ///
    /// Used for the lifecycle deadline: `max_age + jitter(start + stop)`.
    #[inline]
    pub fn splay(&self, base: Duration, spread: Duration) -> Duration {
        base.saturating_add(self.offset(spread))
    }
}

fn nanos(d: Duration) -> u64 {
    d.as_nanos().min(u128::from(u64::MAX)) as u64
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_none_is_exact() {
        let base = Duration::from_secs(60);
        assert_eq!(JitterPolicy::None.splay(base, Duration::from_secs(5)), base);
    }

    #[test]
    fn test_full_stays_within_spread() {
        let base = Duration::from_secs(60);
        let spread = Duration::from_millis(300);
        for _ in 0..200 {
            let d = JitterPolicy::Full.splay(base, spread);
            assert!(d >= base && d <= base + spread);
        }
    }

    #[test]
    fn test_equal_keeps_lower_half() {
        let spread = Duration::from_millis(100);
        for _ in 0..200 {
            let d = JitterPolicy::Equal.offset(spread);
            assert!(d >= spread / 2 && d <= spread);
        }
    }

    #[test]
    fn test_zero_spread() {
        assert_eq!(JitterPolicy::Full.offset(Duration::ZERO), Duration::ZERO);
        assert_eq!(JitterPolicy::Equal.offset(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_batch_deadlines_differ() {
        let base = Duration::from_secs(1800);
        let spread = Duration::from_secs(60);
        let deadlines: HashSet<_> = (0..16)
            .map(|_| JitterPolicy::Full.splay(base, spread))
            .collect();
        assert_eq!(deadlines.len(), 16);
    }
}
