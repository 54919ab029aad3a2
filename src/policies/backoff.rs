//! # Exponential backoff for restart scheduling.
//!
//! [`Backoff`] computes the delay before the k-th consecutive restart
//! attempt: `min(min_delay × 2^(k-1), max_delay)`. It is parameterized by:
//! - [`Backoff::min`] the initial delay;
//! - [`Backoff::max`] the maximum delay cap.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use procvisor::Backoff;
//!
//! let backoff = Backoff {
//!     min: Duration::from_millis(1000),
//!     max: Duration::from_millis(30_000),
//! };
//!
//! // attempts already failed: 0 → first retry waits the initial delay
//! assert_eq!(backoff.delay_for(0), Duration::from_millis(1000));
//! assert_eq!(backoff.delay_for(1), Duration::from_millis(2000));
//! assert_eq!(backoff.delay_for(2), Duration::from_millis(4000));
//!
//! // growth is capped at `max`
//! assert_eq!(backoff.delay_for(10), Duration::from_millis(30_000));
//! ```

use std::time::Duration;

/// Restart delay schedule.
///
/// Doubling starts from [`Backoff::min`] and is capped at [`Backoff::max`].
/// Shift overflow saturates to the cap, so arbitrarily large attempt
/// counts are safe.
#[derive(Clone, Copy, Debug)]
pub struct Backoff {
    /// Delay before the first retry.
    pub min: Duration,
    /// Cap on the computed delay.
    pub max: Duration,
}

impl Default for Backoff {
    /// Returns the supervisor defaults: `min = 1000 ms`, `max = 30 000 ms`.
    fn default() -> Self {
        Self {
            min: Duration::from_millis(1000),
            max: Duration::from_millis(30_000),
        }
    }
}

impl Backoff {
    /// Computes the delay scheduled after `attempts` consecutive failed
    /// starts (zero-based: the first retry passes `0`).
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let min_ms = self.min.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;

        let scaled = if attempts >= 63 {
            u64::MAX
        } else {
            min_ms.saturating_mul(1u64 << attempts)
        };
        Duration::from_millis(scaled.min(max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_from_min() {
        let b = Backoff::default();
        assert_eq!(b.delay_for(0), Duration::from_millis(1000));
        assert_eq!(b.delay_for(1), Duration::from_millis(2000));
        assert_eq!(b.delay_for(2), Duration::from_millis(4000));
        assert_eq!(b.delay_for(3), Duration::from_millis(8000));
    }

    #[test]
    fn caps_at_max() {
        let b = Backoff::default();
        assert_eq!(b.delay_for(5), Duration::from_millis(30_000));
        assert_eq!(b.delay_for(6), Duration::from_millis(30_000));
    }

    #[test]
    fn huge_attempt_counts_saturate() {
        let b = Backoff {
            min: Duration::from_millis(500),
            max: Duration::from_secs(10),
        };
        assert_eq!(b.delay_for(63), Duration::from_secs(10));
        assert_eq!(b.delay_for(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn min_above_max_collapses_to_max() {
        let b = Backoff {
            min: Duration::from_secs(60),
            max: Duration::from_secs(30),
        };
        assert_eq!(b.delay_for(0), Duration::from_secs(30));
    }
}
