//! # Runtime events emitted by the supervisor and its monitors.
//!
//! [`EventKind`] classifies emissions across three categories:
//! - **Lifecycle events**: entry state transitions (starting, running,
//!   stopping, stopped, errored, restarting)
//! - **Policy events**: restart scheduling and refusals (backoff scheduled,
//!   crash loop, max restarts)
//! - **Monitor events**: resource thresholds, advisory memory warnings,
//!   file changes, readiness probe outcomes
//!
//! [`Event`] carries optional metadata: entry id and name, a reason or
//! error message, a scheduled delay, and threshold numbers.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically, so subscribers can order events delivered through async
//! channels.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Resource dimension a threshold event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    /// Resident set size against `memory_limit`.
    Memory,
    /// Rolling-mean CPU percentage against `cpu_limit`.
    Cpu,
}

impl LimitKind {
    /// Returns the wire/log label (`memory` or `cpu`).
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitKind::Memory => "memory",
            LimitKind::Cpu => "cpu",
        }
    }
}

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Entry lifecycle ===
    /// Child spawn initiated.
    Starting,
    /// Child spawned and wired up.
    Running,
    /// Termination signal sent; waiting for exit.
    Stopping,
    /// Child exited after an explicit stop; entry removed.
    Stopped,
    /// Child exited with a failure; policy consulted.
    Errored,
    /// Scheduled respawn beginning.
    Restarting,

    // === Restart policy ===
    /// A restart was granted and scheduled after a backoff delay.
    BackoffScheduled,
    /// Five or more crashes within the crash window; restarts denied.
    CrashLoop,
    /// Consecutive failed starts exhausted `max_restarts`; restarts denied.
    MaxRestarts,

    // === Monitors ===
    /// A hysteresis counter reached its trip count.
    ThresholdExceeded,
    /// A sample exceeded the advisory fraction of the memory limit.
    MemoryWarning,
    /// Debounced filesystem change under the watched tree.
    FileChange,
    /// Readiness probe succeeded within its budget.
    ProbeReady,
    /// Readiness probe exhausted its budget; entry stays running.
    ProbeFailed,

    // === Daemon ===
    /// OS termination signal received; shutdown beginning.
    ShutdownRequested,
}

/// Runtime event with optional metadata.
///
/// ## Fields
/// - `seq`: unique sequence number (monotonically increasing)
/// - `at`: wall-clock timestamp (logging only; may go backwards)
/// - `kind`: event classification
/// - `id`, `name`, `reason`, `delay`, `resource`, `current`, `limit`:
///   optional metadata filled by the emitter
#[derive(Debug, Clone)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// The kind of event.
    pub kind: EventKind,
    /// Entry id, if applicable.
    pub id: Option<String>,
    /// Entry name, if applicable.
    pub name: Option<String>,
    /// Reason or error message, if the event represents a failure.
    pub reason: Option<String>,
    /// Scheduled delay (backoff events).
    pub delay: Option<Duration>,
    /// Resource dimension (threshold and warning events).
    pub resource: Option<LimitKind>,
    /// Observed value at emission time (bytes or percent).
    pub current: Option<f64>,
    /// Configured limit (bytes or percent).
    pub limit: Option<f64>,
}

impl Event {
    /// Creates a new event of the given kind with the next sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            id: None,
            name: None,
            reason: None,
            delay: None,
            resource: None,
            current: None,
            limit: None,
        }
    }

    /// Attaches the entry id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Attaches the entry name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attaches a reason or error message.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a scheduled delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Attaches threshold metadata.
    pub fn with_threshold(mut self, resource: LimitKind, current: f64, limit: f64) -> Self {
        self.resource = Some(resource);
        self.current = Some(current);
        self.limit = Some(limit);
        self
    }
}
