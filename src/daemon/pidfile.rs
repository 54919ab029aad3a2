//! # Pid file: single-daemon guarantee.
//!
//! The daemon records its pid in `<data>/daemon.pid` on boot. A second
//! daemon finds the file, probes the recorded pid with signal 0, and
//! refuses to start while it is alive. A stale file (dead pid) is
//! overwritten silently.

use std::path::Path;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::debug;

use crate::error::{Error, Result};

/// True when a process with `pid` exists (signal-0 probe).
pub fn process_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None::<Signal>).is_ok()
}

/// Claims the pid file for the current process.
///
/// Fails with [`Error::AlreadyRunning`] when the recorded pid is alive.
pub async fn acquire(path: &Path) -> Result<()> {
    if let Ok(raw) = tokio::fs::read_to_string(path).await {
        if let Ok(pid) = raw.trim().parse::<u32>() {
            if process_alive(pid) {
                return Err(Error::AlreadyRunning { pid });
            }
            debug!(pid, "stale pid file; taking over");
        }
    }
    tokio::fs::write(path, format!("{}\n", std::process::id())).await?;
    Ok(())
}

/// Removes the pid file, best effort.
pub async fn release(path: &Path) {
    let _ = tokio::fs::remove_file(path).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_writes_our_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");

        acquire(&path).await.unwrap();
        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(raw.trim().parse::<u32>().unwrap(), std::process::id());
    }

    #[tokio::test]
    async fn live_pid_refuses_a_second_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");
        // Our own pid is certainly alive.
        tokio::fs::write(&path, format!("{}\n", std::process::id()))
            .await
            .unwrap();

        let err = acquire(&path).await.unwrap_err();
        assert_eq!(err.as_label(), "already_running");
    }

    #[tokio::test]
    async fn stale_pid_is_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");
        // Far above pid_max on a default Linux config.
        tokio::fs::write(&path, "1999999999\n").await.unwrap();

        acquire(&path).await.unwrap();
        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(raw.trim().parse::<u32>().unwrap(), std::process::id());
    }
}
