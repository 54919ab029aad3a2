//! # Error types used by the supervisor daemon.
//!
//! One [`Error`] enum covers every failure the engine can surface to a
//! client or log. Background activities (sampling a vanished pid, a failed
//! log rotation, a failed snapshot write) never return these — they log and
//! swallow, per the non-fatal rule.
//!
//! [`Error::as_label`] provides short stable labels for logs.

use std::time::Duration;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by supervisor operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    /// No entry matches the given id or name.
    #[error("process not found: {target}")]
    NotFound {
        /// The id or name the client asked for.
        target: String,
    },

    /// Another daemon already owns the pid file.
    #[error("daemon already running (pid {pid})")]
    AlreadyRunning {
        /// Pid recorded in the existing pid file.
        pid: u32,
    },

    /// A spec, manifest or option failed validation.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// One-line validation failure.
        reason: String,
    },

    /// The child process could not be launched.
    #[error("failed to spawn '{script}': {source}")]
    SpawnFailed {
        /// Script the spawn was attempted for.
        script: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A termination signal could not be delivered.
    #[error("failed to signal pid {pid}: {reason}")]
    SignalFailed {
        /// Target pid.
        pid: u32,
        /// Errno text from the kernel.
        reason: String,
    },

    /// A bounded wait (stop, readiness, IPC request) elapsed.
    #[error("{what} timed out after {after:?}")]
    Timeout {
        /// What was being waited for.
        what: String,
        /// The elapsed bound.
        after: Duration,
    },

    /// Snapshot, journal or log I/O failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The restart policy refused a restart.
    #[error("restart denied: {reason}")]
    PolicyDenied {
        /// `crash-loop` or `max-restarts`.
        reason: String,
    },

    /// A control-plane frame could not be parsed.
    #[error("protocol error: {reason}")]
    Protocol {
        /// One-line parse failure.
        reason: String,
    },
}

impl Error {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::AlreadyRunning { .. } => "already_running",
            Error::InvalidConfig { .. } => "invalid_config",
            Error::SpawnFailed { .. } => "spawn_failed",
            Error::SignalFailed { .. } => "signal_failed",
            Error::Timeout { .. } => "timeout",
            Error::Io(_) => "io_error",
            Error::PolicyDenied { .. } => "policy_denied",
            Error::Protocol { .. } => "protocol_error",
        }
    }
}
