//! # Child process contract: spawn, signal, output capture.
//!
//! ## Spawn contract
//! The child is launched as `<interpreter> <script> <args…>` with stdin
//! closed and stdout/stderr captured as pipes; it is **not** detached and
//! dies with the daemon (`kill_on_drop`). The working directory defaults
//! to the daemon's own; the environment is the parent environment
//! overlaid with the spec's `env` map.
//!
//! ## Stop contract
//! Termination is SIGTERM first; the supervisor force-kills with SIGKILL
//! after its soft deadline. Signal delivery failures surface as
//! [`Error::SignalFailed`] except for already-gone processes.

use std::process::Stdio;
use std::sync::Arc;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::logs::{LogSink, StreamKind};
use crate::registry::EntrySpec;

/// A freshly spawned child with its OS pid.
pub struct Spawned {
    /// Handle owned by the waiter task.
    pub child: Child,
    /// OS pid (0 is never returned for a live spawn).
    pub pid: u32,
}

/// Launches the interpreter against the spec's script.
pub fn spawn_child(interpreter: &str, spec: &EntrySpec) -> Result<Spawned> {
    let mut cmd = Command::new(interpreter);
    cmd.arg(&spec.script)
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .envs(&spec.env)
        .kill_on_drop(true);
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }

    let child = cmd.spawn().map_err(|e| Error::SpawnFailed {
        script: spec.script.display().to_string(),
        source: e,
    })?;
    let pid = child.id().unwrap_or(0);
    Ok(Spawned { child, pid })
}

/// Sends SIGTERM. Already-gone processes are not an error; the waiter
/// delivers their exit regardless.
pub fn terminate(pid: u32) -> Result<()> {
    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(e) => Err(Error::SignalFailed {
            pid,
            reason: e.to_string(),
        }),
    }
}

/// Sends SIGKILL, best effort.
pub fn force_kill(pid: u32) {
    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        if e != nix::errno::Errno::ESRCH {
            debug!(pid, error = %e, "SIGKILL delivery failed");
        }
    }
}

/// Splits an exit status into `(code, signal)`.
#[cfg(unix)]
pub fn exit_parts(status: std::process::ExitStatus) -> (Option<i32>, Option<i32>) {
    use std::os::unix::process::ExitStatusExt;
    (status.code(), status.signal())
}

#[cfg(not(unix))]
pub fn exit_parts(status: std::process::ExitStatus) -> (Option<i32>, Option<i32>) {
    (status.code(), None)
}

/// Spawns a task pumping one child stream into the entry's sink,
/// line by line.
pub fn pump_stream<R>(reader: R, sink: Option<Arc<Mutex<LogSink>>>, kind: StreamKind)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(sink) = &sink {
                let mut sink = sink.lock().await;
                if let Err(e) = sink.write(kind, &line).await {
                    debug!(error = %e, "log sink write failed");
                }
            }
        }
        if let Some(sink) = &sink {
            let _ = sink.lock().await.flush().await;
        }
    });
}
