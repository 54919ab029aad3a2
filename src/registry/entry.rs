//! # Entry model: one supervised child program.
//!
//! [`Entry`] is the in-memory record the registry holds per program:
//! the immutable [`EntrySpec`] supplied at start time plus the mutable
//! lifecycle fields the supervisor maintains (state, pid, restart
//! accounting, sampled metrics).
//!
//! Everything here serializes to camelCase JSON; the same shape is used
//! for the persisted snapshot and for `status` replies on the wire.
//!
//! ## Rules
//! - `os_pid > 0` iff `state ∈ {starting, running, stopping}`
//! - `cpu_percent`, `rss_bytes` and `uptime_ms` are volatile: they are
//!   refreshed by the sampler/status path and carry no meaning across a
//!   daemon restart

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    /// Spawn initiated, child not yet confirmed up.
    Starting,
    /// Child is up and wired to its monitors.
    Running,
    /// Termination signal sent; waiting for the exit.
    Stopping,
    /// No child and no pending respawn.
    Stopped,
    /// Child failed and the entry awaits (or was denied) a respawn.
    Errored,
    /// Backoff elapsed; respawn in progress.
    Restarting,
}

impl EntryState {
    /// True for the states that own a live child process.
    #[inline]
    pub fn has_live_child(&self) -> bool {
        matches!(
            self,
            EntryState::Starting | EntryState::Running | EntryState::Stopping
        )
    }

    /// Wire/log label (lowercase).
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryState::Starting => "starting",
            EntryState::Running => "running",
            EntryState::Stopping => "stopping",
            EntryState::Stopped => "stopped",
            EntryState::Errored => "errored",
            EntryState::Restarting => "restarting",
        }
    }
}

/// Why the most recent restart happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartReason {
    /// Operator-issued `restart`.
    Manual,
    /// Automatic respawn after a failed exit.
    Crash,
    /// Memory threshold restart.
    Memory,
    /// CPU threshold restart.
    Cpu,
    /// Watched-path change restart.
    FileChange,
}

impl RestartReason {
    /// Wire/log label (kebab-case).
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartReason::Manual => "manual",
            RestartReason::Crash => "crash",
            RestartReason::Memory => "memory",
            RestartReason::Cpu => "cpu",
            RestartReason::FileChange => "file-change",
        }
    }
}

/// How captured output lines are framed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// `[<ISO8601>] [<LEVEL>] [<name>] <chunk>`
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Where framed output goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    /// Per-entry rotated file under the data directory.
    #[default]
    File,
    /// The daemon's own stdout.
    Stdout,
}

/// Immutable declaration supplied when an entry is started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntrySpec {
    /// Human label, unique across live entries.
    pub name: String,
    /// Script the interpreter is launched against.
    pub script: PathBuf,
    /// Extra arguments passed after the script path.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory; defaults to the daemon's own.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Environment overlay applied on top of the parent environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Interpreter override; defaults to the daemon-wide one.
    #[serde(default)]
    pub interpreter: Option<String>,
    /// Restart on changes under the script's directory.
    #[serde(default)]
    pub watch: bool,
    /// Extra ignore patterns merged with the built-ins.
    #[serde(default)]
    pub watch_ignore: Vec<String>,
    /// Resident-set budget in bytes.
    #[serde(default)]
    pub memory_limit: Option<u64>,
    /// CPU budget in percent (0–100).
    #[serde(default)]
    pub cpu_limit: Option<f64>,
    /// Initial restart delay override in milliseconds.
    #[serde(default)]
    pub restart_delay: Option<u64>,
    /// Max consecutive failed starts override.
    #[serde(default)]
    pub max_restarts: Option<u32>,
    /// HTTP readiness URL probed after spawn.
    #[serde(default)]
    pub health_check: Option<String>,
    /// Output framing.
    #[serde(default)]
    pub log_format: LogFormat,
    /// Output destination.
    #[serde(default)]
    pub log_output: LogOutput,
    /// Advertised metrics port (recorded, not consumed by the engine).
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

impl EntrySpec {
    /// Creates a minimal spec with defaults for everything optional.
    pub fn new(name: impl Into<String>, script: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            script: script.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            interpreter: None,
            watch: false,
            watch_ignore: Vec::new(),
            memory_limit: None,
            cpu_limit: None,
            restart_delay: None,
            max_restarts: None,
            health_check: None,
            log_format: LogFormat::default(),
            log_output: LogOutput::default(),
            metrics_port: None,
        }
    }
}

/// One supervised program as tracked by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Opaque 10-character alphanumeric id generated on creation.
    pub id: String,
    /// Copy of `spec.name`, kept flat for lookups and replies.
    pub name: String,
    /// Immutable declaration.
    pub spec: EntrySpec,
    /// Lifecycle state.
    pub state: EntryState,
    /// OS pid of the live child; 0 when no child is live.
    pub os_pid: u32,
    /// Wall-clock time of the current child's spawn.
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    /// Milliseconds since `start_time`; refreshed on status, volatile.
    #[serde(default)]
    pub uptime_ms: u64,
    /// Restarts performed over the entry's lifetime.
    #[serde(default)]
    pub restart_count: u32,
    /// Wall-clock time of the last restart.
    #[serde(default)]
    pub last_restart_time: Option<DateTime<Utc>>,
    /// Why the last restart happened.
    #[serde(default)]
    pub last_restart_reason: Option<RestartReason>,
    /// Last sampled rolling-mean CPU percentage; volatile.
    #[serde(default)]
    pub cpu_percent: f64,
    /// Last sampled resident set size in bytes; volatile.
    #[serde(default)]
    pub rss_bytes: u64,
}

impl Entry {
    /// Creates a fresh entry in `starting` with no child yet.
    pub fn new(id: String, spec: EntrySpec) -> Self {
        Self {
            id,
            name: spec.name.clone(),
            spec,
            state: EntryState::Starting,
            os_pid: 0,
            start_time: None,
            uptime_ms: 0,
            restart_count: 0,
            last_restart_time: None,
            last_restart_reason: None,
            cpu_percent: 0.0,
            rss_bytes: 0,
        }
    }

    /// Recomputes `uptime_ms` from `start_time` (0 when no child is live).
    pub fn refresh_uptime(&mut self) {
        self.uptime_ms = match (self.state.has_live_child(), self.start_time) {
            (true, Some(t)) => (Utc::now() - t).num_milliseconds().max(0) as u64,
            _ => 0,
        };
    }

    /// Marks the entry as carrying a live child.
    pub fn note_spawned(&mut self, pid: u32) {
        self.os_pid = pid;
        self.state = EntryState::Running;
        self.start_time = Some(Utc::now());
    }

    /// Clears the child-related fields after an exit.
    pub fn note_exited(&mut self, next: EntryState) {
        debug_assert!(!next.has_live_child());
        self.os_pid = 0;
        self.state = next;
        self.cpu_percent = 0.0;
        self.rss_bytes = 0;
    }

    /// Records a restart about to happen.
    pub fn note_restart(&mut self, reason: RestartReason) {
        self.restart_count = self.restart_count.saturating_add(1);
        self.last_restart_time = Some(Utc::now());
        self.last_restart_reason = Some(reason);
    }
}
