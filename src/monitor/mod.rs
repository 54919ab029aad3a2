//! Background monitors: resource sampling, path watching, readiness
//! probing.
//!
//! Each monitor runs as a cancellable task tied to its entry's lifetime
//! and feeds observations into the supervisor queue as [`MonitorEvent`]s.
//! Monitors never mutate the registry themselves.

mod probe;
mod sampler;
mod watcher;

pub use probe::{wait_ready, HttpProbe, Probe};
pub use sampler::{spawn_sampler, SampleRing, SamplerParams, ThresholdSignal, ThresholdTracker};
pub use watcher::{spawn_watcher, WatchParams, BUILTIN_IGNORES};

use crate::events::LimitKind;

/// Observation delivered from a monitor task to the supervisor.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    /// Periodic metrics sample.
    Metrics {
        /// Entry id.
        id: String,
        /// CPU rolling mean in percent.
        cpu_avg: f64,
        /// Resident set size in bytes.
        rss: u64,
    },
    /// A hysteresis counter tripped.
    Threshold {
        /// Entry id.
        id: String,
        /// Which limit fired.
        kind: LimitKind,
        /// Observed value.
        current: f64,
        /// Configured limit.
        limit: f64,
    },
    /// Advisory memory pressure warning.
    MemoryWarning {
        /// Entry id.
        id: String,
        /// Observed resident set size.
        rss: u64,
        /// Configured memory limit.
        limit: u64,
    },
    /// Debounced change under the watched tree.
    FileChange {
        /// Entry id.
        id: String,
    },
    /// Readiness probe outcome.
    ProbeResult {
        /// Entry id.
        id: String,
        /// True when the endpoint became ready within the budget.
        healthy: bool,
    },
}
