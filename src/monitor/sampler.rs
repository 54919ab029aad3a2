//! # ResourceSampler: periodic CPU/RSS sampling with threshold hysteresis.
//!
//! One cancellable task per monitored entry. Every tick it measures the
//! child's OS-reported CPU% and resident set size, pushes them into a
//! ring buffer, and reports a metrics event carrying the CPU rolling
//! mean. Threshold checks use hysteresis counters so a single spike
//! never triggers a restart.
//!
//! ## Threshold rule
//! - a counter increments on each sample exceeding its limit and resets
//!   to zero on any sample below;
//! - memory fires at 3 consecutive exceeding samples, CPU at 5;
//! - firing resets the counter (so a persistently-hot process fires
//!   again only after another full run);
//! - every sample above 80% of the memory limit additionally reports an
//!   advisory warning.
//!
//! ## Rules
//! - Sampling stops silently when the pid vanishes.
//! - The task never touches the registry; observations travel as
//!   [`MonitorEvent`]s into the supervisor queue.

use std::collections::VecDeque;
use std::time::Duration;

use sysinfo::{Pid as SysPid, ProcessesToUpdate, System};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::events::LimitKind;

use super::MonitorEvent;

/// Ring buffer of recent samples plus the CPU rolling mean.
#[derive(Debug)]
pub struct SampleRing {
    samples: VecDeque<(f64, u64)>,
    cap: usize,
    cpu_window: usize,
}

impl SampleRing {
    /// Creates a ring keeping `cap` samples, averaging CPU over the last
    /// `cpu_window`.
    pub fn new(cap: usize, cpu_window: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(cap),
            cap: cap.max(1),
            cpu_window: cpu_window.max(1),
        }
    }

    /// Pushes one `(cpu_percent, rss_bytes)` sample.
    pub fn push(&mut self, cpu: f64, rss: u64) {
        if self.samples.len() == self.cap {
            self.samples.pop_front();
        }
        self.samples.push_back((cpu, rss));
    }

    /// Rolling mean over the newest `cpu_window` CPU samples.
    pub fn cpu_mean(&self) -> f64 {
        let taken = self.samples.len().min(self.cpu_window);
        if taken == 0 {
            return 0.0;
        }
        let sum: f64 = self
            .samples
            .iter()
            .rev()
            .take(taken)
            .map(|(cpu, _)| *cpu)
            .sum();
        sum / taken as f64
    }

    /// Number of retained samples.
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when nothing has been sampled yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// What a threshold observation produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdSignal {
    /// A hysteresis counter reached its trip count.
    Exceeded {
        /// Which limit fired.
        kind: LimitKind,
        /// Observed value (bytes or percent).
        current: f64,
        /// Configured limit (bytes or percent).
        limit: f64,
    },
    /// Advisory: the sample crossed the warning fraction of the memory
    /// limit.
    MemoryWarning {
        /// Observed resident set size.
        rss: u64,
        /// Configured memory limit.
        limit: u64,
    },
}

/// Hysteresis counters over one entry's limits.
#[derive(Debug)]
pub struct ThresholdTracker {
    mem_limit: Option<u64>,
    cpu_limit: Option<f64>,
    mem_trip: u32,
    cpu_trip: u32,
    warn_ratio: f64,
    mem_count: u32,
    cpu_count: u32,
}

impl ThresholdTracker {
    /// Creates counters for the given limits and trip counts.
    pub fn new(
        mem_limit: Option<u64>,
        cpu_limit: Option<f64>,
        mem_trip: u32,
        cpu_trip: u32,
        warn_ratio: f64,
    ) -> Self {
        Self {
            mem_limit,
            cpu_limit,
            mem_trip,
            cpu_trip,
            warn_ratio,
            mem_count: 0,
            cpu_count: 0,
        }
    }

    /// Feeds one sample; returns every signal it produced.
    pub fn observe(&mut self, cpu_avg: f64, rss: u64) -> Vec<ThresholdSignal> {
        let mut out = Vec::new();

        if let Some(limit) = self.mem_limit {
            if rss as f64 > limit as f64 * self.warn_ratio {
                out.push(ThresholdSignal::MemoryWarning { rss, limit });
            }
            if rss > limit {
                self.mem_count += 1;
                if self.mem_count >= self.mem_trip {
                    self.mem_count = 0;
                    out.push(ThresholdSignal::Exceeded {
                        kind: LimitKind::Memory,
                        current: rss as f64,
                        limit: limit as f64,
                    });
                }
            } else {
                self.mem_count = 0;
            }
        }

        if let Some(limit) = self.cpu_limit {
            if cpu_avg > limit {
                self.cpu_count += 1;
                if self.cpu_count >= self.cpu_trip {
                    self.cpu_count = 0;
                    out.push(ThresholdSignal::Exceeded {
                        kind: LimitKind::Cpu,
                        current: cpu_avg,
                        limit,
                    });
                }
            } else {
                self.cpu_count = 0;
            }
        }

        out
    }
}

/// Parameters for one entry's sampler task.
#[derive(Debug, Clone)]
pub struct SamplerParams {
    /// Entry id the observations belong to.
    pub id: String,
    /// Pid to sample.
    pub pid: u32,
    /// Resident-set budget, if any.
    pub mem_limit: Option<u64>,
    /// CPU budget in percent, if any.
    pub cpu_limit: Option<f64>,
    /// Sampling tick.
    pub interval: Duration,
    /// Ring buffer capacity.
    pub ring: usize,
    /// CPU rolling-mean window.
    pub cpu_window: usize,
    /// Memory hysteresis trip count.
    pub mem_trip: u32,
    /// CPU hysteresis trip count.
    pub cpu_trip: u32,
    /// Advisory warning fraction of the memory limit.
    pub warn_ratio: f64,
}

/// Spawns the sampling task for one entry. The task exits on
/// cancellation or silently when the pid disappears.
pub fn spawn_sampler(
    params: SamplerParams,
    tx: mpsc::UnboundedSender<MonitorEvent>,
    token: CancellationToken,
) {
    tokio::spawn(async move {
        let sys_pid = SysPid::from_u32(params.pid);
        let mut system = System::new();
        let mut ring = SampleRing::new(params.ring, params.cpu_window);
        let mut tracker = ThresholdTracker::new(
            params.mem_limit,
            params.cpu_limit,
            params.mem_trip,
            params.cpu_trip,
            params.warn_ratio,
        );

        // Warm-up refresh so the first real tick has a CPU delta to work
        // with.
        system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);

        let mut tick = tokio::time::interval(params.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tick.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tick.tick() => {}
            }

            system.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
            let Some(proc_info) = system.process(sys_pid) else {
                trace!(id = %params.id, pid = params.pid, "sampled pid gone; sampler stopping");
                return;
            };

            let cpu = f64::from(proc_info.cpu_usage());
            let rss = proc_info.memory();
            ring.push(cpu, rss);
            let cpu_avg = ring.cpu_mean();

            if tx
                .send(MonitorEvent::Metrics {
                    id: params.id.clone(),
                    cpu_avg,
                    rss,
                })
                .is_err()
            {
                return;
            }

            for signal in tracker.observe(cpu_avg, rss) {
                let event = match signal {
                    ThresholdSignal::Exceeded { kind, current, limit } => {
                        MonitorEvent::Threshold {
                            id: params.id.clone(),
                            kind,
                            current,
                            limit,
                        }
                    }
                    ThresholdSignal::MemoryWarning { rss, limit } => {
                        MonitorEvent::MemoryWarning {
                            id: params.id.clone(),
                            rss,
                            limit,
                        }
                    }
                };
                if tx.send(event).is_err() {
                    return;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_mean_covers_the_window() {
        let mut ring = SampleRing::new(60, 3);
        for cpu in [10.0, 20.0, 30.0, 40.0] {
            ring.push(cpu, 0);
        }
        // Mean of the newest three: (20 + 30 + 40) / 3.
        assert!((ring.cpu_mean() - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ring_evicts_oldest_at_capacity() {
        let mut ring = SampleRing::new(3, 3);
        for cpu in [1.0, 2.0, 3.0, 4.0] {
            ring.push(cpu, 0);
        }
        assert_eq!(ring.len(), 3);
        assert!((ring.cpu_mean() - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn memory_fires_after_three_consecutive_exceeding_samples() {
        let mut t = ThresholdTracker::new(Some(100), None, 3, 5, 0.8);

        assert!(!fired(&mut t, 0.0, 150));
        assert!(!fired(&mut t, 0.0, 150));
        assert!(fired(&mut t, 0.0, 150));
        // Counter was reset by firing; two more are not enough.
        assert!(!fired(&mut t, 0.0, 150));
        assert!(!fired(&mut t, 0.0, 150));
        assert!(fired(&mut t, 0.0, 150));
    }

    #[test]
    fn a_dip_resets_the_memory_counter() {
        let mut t = ThresholdTracker::new(Some(100), None, 3, 5, 0.8);
        assert!(!fired(&mut t, 0.0, 150));
        assert!(!fired(&mut t, 0.0, 150));
        assert!(!fired(&mut t, 0.0, 50));
        assert!(!fired(&mut t, 0.0, 150));
        assert!(!fired(&mut t, 0.0, 150));
        assert!(fired(&mut t, 0.0, 150));
    }

    #[test]
    fn cpu_fires_after_five_consecutive_exceeding_samples() {
        let mut t = ThresholdTracker::new(None, Some(50.0), 3, 5, 0.8);
        for _ in 0..4 {
            assert!(!fired(&mut t, 90.0, 0));
        }
        assert!(fired(&mut t, 90.0, 0));
    }

    #[test]
    fn warning_is_advisory_and_repeats() {
        let mut t = ThresholdTracker::new(Some(100), None, 3, 5, 0.8);
        let signals = t.observe(0.0, 85);
        assert_eq!(
            signals,
            vec![ThresholdSignal::MemoryWarning { rss: 85, limit: 100 }]
        );
        // Still above 80%: the advisory repeats, no threshold fires.
        let signals = t.observe(0.0, 90);
        assert_eq!(signals.len(), 1);
    }

    #[test]
    fn no_limits_mean_no_signals() {
        let mut t = ThresholdTracker::new(None, None, 3, 5, 0.8);
        assert!(t.observe(400.0, u64::MAX).is_empty());
    }

    fn fired(t: &mut ThresholdTracker, cpu: f64, rss: u64) -> bool {
        t.observe(cpu, rss)
            .iter()
            .any(|s| matches!(s, ThresholdSignal::Exceeded { .. }))
    }
}
