//! # Restart policy with crash-window loop detection.
//!
//! [`RestartPolicy`] decides, after every child exit, whether the entry is
//! respawned and how long the supervisor waits first.
//!
//! ## Decision order (failed exits only)
//! 1. record the crash time, prune times older than the crash window;
//! 2. more crashes in the window than the loop threshold tolerates →
//!    mark the crash loop and **deny**;
//! 3. consecutive failed starts reached `max_restarts` → **deny**;
//! 4. otherwise **grant** a restart after
//!    `min(min_delay × 2^attempts, max_delay)` and increment `attempts`.
//!
//! Clean exits (code 0, no signal) always deny without touching the book.
//!
//! ## Rules
//! - `attempts` counts consecutive failed starts since the last healthy
//!   run; [`RestartPolicy::reset_attempts`] zeroes it (and the loop flag)
//!   but keeps the crash-time window intact.
//! - The crash window is monotonic-clock based; callers pass `now` so the
//!   schedule is testable without sleeping.

use std::time::{Duration, Instant};

use super::backoff::Backoff;

/// Why a restart was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The child exited with code 0 and no signal.
    CleanExit,
    /// The crash window exceeded the loop threshold.
    CrashLoop,
    /// Consecutive failed starts exhausted `max_restarts`.
    MaxRestarts,
}

impl DenyReason {
    /// Short stable label for replies and logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            DenyReason::CleanExit => "clean-exit",
            DenyReason::CrashLoop => "crash-loop",
            DenyReason::MaxRestarts => "max-restarts",
        }
    }
}

/// Outcome of consulting the policy after a child exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Respawn after `delay`.
    Grant {
        /// Backoff delay before the respawn.
        delay: Duration,
    },
    /// Do not respawn.
    Deny(DenyReason),
}

/// Per-entry restart bookkeeping, private to the policy.
#[derive(Debug, Clone, Default)]
pub struct RestartBook {
    /// Consecutive failed starts since the last healthy run.
    attempts: u32,
    /// Crash times within the crash window (pruned on every decision).
    crash_times: Vec<Instant>,
    /// Latched once the window overflows; cleared by `reset_attempts`.
    in_crash_loop: bool,
}

impl RestartBook {
    /// Current consecutive-failure count.
    #[inline]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// True once the crash-loop cut-off has fired.
    #[inline]
    pub fn in_crash_loop(&self) -> bool {
        self.in_crash_loop
    }

    /// Crashes currently inside the window (after the last prune).
    #[inline]
    pub fn window_len(&self) -> usize {
        self.crash_times.len()
    }
}

/// Restart decision engine shared by all entries.
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    /// Delay schedule for granted restarts.
    pub backoff: Backoff,
    /// Consecutive failed starts tolerated before denying.
    pub max_restarts: u32,
    /// Sliding window over which crashes are counted.
    pub window: Duration,
    /// Crashes tolerated inside the window; one more trips the loop.
    pub loop_threshold: usize,
}

impl Default for RestartPolicy {
    /// Defaults: backoff 1 s → 30 s, `max_restarts = 10`, 60 s window,
    /// loop threshold 5.
    fn default() -> Self {
        Self {
            backoff: Backoff::default(),
            max_restarts: 10,
            window: Duration::from_secs(60),
            loop_threshold: 5,
        }
    }
}

impl RestartPolicy {
    /// Decides what happens after a child exit.
    ///
    /// `clean` is true for exit code 0 without a signal. `now` is the
    /// monotonic time of the exit observation.
    pub fn on_exit(&self, book: &mut RestartBook, clean: bool, now: Instant) -> RestartDecision {
        if clean {
            return RestartDecision::Deny(DenyReason::CleanExit);
        }

        book.crash_times.push(now);
        let window = self.window;
        book.crash_times
            .retain(|t| now.duration_since(*t) <= window);

        if book.crash_times.len() > self.loop_threshold {
            book.in_crash_loop = true;
            return RestartDecision::Deny(DenyReason::CrashLoop);
        }

        if book.attempts >= self.max_restarts {
            return RestartDecision::Deny(DenyReason::MaxRestarts);
        }

        let delay = self.backoff.delay_for(book.attempts);
        book.attempts = book.attempts.saturating_add(1);
        RestartDecision::Grant { delay }
    }

    /// Zeroes `attempts` and clears the crash-loop flag after a healthy
    /// run. The crash-time window is deliberately kept: a process that
    /// alternates short healthy runs with crashes must still trip the
    /// window cut-off.
    pub fn reset_attempts(&self, book: &mut RestartBook) {
        book.attempts = 0;
        book.in_crash_loop = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RestartPolicy {
        RestartPolicy::default()
    }

    #[test]
    fn clean_exit_always_denies() {
        let p = policy();
        let mut book = RestartBook::default();
        let d = p.on_exit(&mut book, true, Instant::now());
        assert_eq!(d, RestartDecision::Deny(DenyReason::CleanExit));
        assert_eq!(book.attempts(), 0);
        assert_eq!(book.window_len(), 0);
    }

    #[test]
    fn delays_follow_the_doubling_schedule() {
        let p = policy();
        let mut book = RestartBook::default();
        let start = Instant::now();

        // Crashes spaced wider than the window never trip the loop.
        let mut expected = [1000u64, 2000, 4000].iter();
        for k in 0..3u64 {
            let now = start + Duration::from_secs(k * 120);
            match p.on_exit(&mut book, false, now) {
                RestartDecision::Grant { delay } => {
                    assert_eq!(delay, Duration::from_millis(*expected.next().unwrap()));
                }
                other => panic!("expected grant, got {other:?}"),
            }
        }
        assert_eq!(book.attempts(), 3);
    }

    #[test]
    fn sixth_crash_in_window_trips_the_loop() {
        let p = policy();
        let mut book = RestartBook::default();
        let start = Instant::now();

        for k in 0..5u64 {
            let now = start + Duration::from_secs(k);
            assert!(matches!(
                p.on_exit(&mut book, false, now),
                RestartDecision::Grant { .. }
            ));
        }
        let sixth = p.on_exit(&mut book, false, start + Duration::from_secs(5));
        assert_eq!(sixth, RestartDecision::Deny(DenyReason::CrashLoop));
        assert!(book.in_crash_loop());
    }

    #[test]
    fn window_prunes_old_crashes() {
        let p = policy();
        let mut book = RestartBook::default();
        let start = Instant::now();

        for k in 0..5u64 {
            p.on_exit(&mut book, false, start + Duration::from_secs(k));
        }
        // 90 s later the window is empty again; the next crash is granted.
        let later = start + Duration::from_secs(95);
        assert!(matches!(
            p.on_exit(&mut book, false, later),
            RestartDecision::Grant { .. }
        ));
        assert_eq!(book.window_len(), 1);
    }

    #[test]
    fn max_restarts_denies_before_the_window_fills() {
        let p = RestartPolicy {
            max_restarts: 2,
            ..RestartPolicy::default()
        };
        let mut book = RestartBook::default();
        let start = Instant::now();

        assert!(matches!(
            p.on_exit(&mut book, false, start),
            RestartDecision::Grant { .. }
        ));
        assert!(matches!(
            p.on_exit(&mut book, false, start + Duration::from_secs(120)),
            RestartDecision::Grant { .. }
        ));
        let third = p.on_exit(&mut book, false, start + Duration::from_secs(240));
        assert_eq!(third, RestartDecision::Deny(DenyReason::MaxRestarts));
    }

    #[test]
    fn reset_attempts_keeps_the_window() {
        let p = policy();
        let mut book = RestartBook::default();
        let start = Instant::now();

        for k in 0..4u64 {
            p.on_exit(&mut book, false, start + Duration::from_secs(k));
        }
        p.reset_attempts(&mut book);
        assert_eq!(book.attempts(), 0);
        assert!(!book.in_crash_loop());
        assert_eq!(book.window_len(), 4);

        // Two more crashes inside the window still trip the loop even
        // though attempts were reset.
        assert!(matches!(
            p.on_exit(&mut book, false, start + Duration::from_secs(4)),
            RestartDecision::Grant { .. }
        ));
        assert_eq!(
            p.on_exit(&mut book, false, start + Duration::from_secs(5)),
            RestartDecision::Deny(DenyReason::CrashLoop)
        );
    }
}
