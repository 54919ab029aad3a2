//! Shared fixtures for integration tests: a scratch daemon config and
//! shell-script children that exercise the supervision paths.

// Each test binary uses a different subset of the fixtures.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use procvisor::config::DaemonConfig;
use procvisor::control::{Reply, Request, RequestOptions};
use procvisor::monitor::HttpProbe;
use procvisor::supervise::{Supervisor, SupervisorHandle};
use procvisor::events::Bus;

/// One test sandbox: temp data dir plus fast timings.
pub struct Sandbox {
    pub dir: TempDir,
    pub cfg: Arc<DaemonConfig>,
    pub bus: Bus,
}

impl Sandbox {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut cfg = DaemonConfig::default();
        cfg.data_dir = dir.path().join("data");
        cfg.socket_path = dir.path().join("control.sock");
        cfg.watch_poll_interval = Duration::from_millis(50);
        cfg.watch_debounce = Duration::from_millis(200);
        cfg.sample_interval = Duration::from_millis(100);
        cfg.stop_grace = Duration::from_secs(3);
        Self {
            dir,
            cfg: Arc::new(cfg),
            bus: Bus::new(256),
        }
    }

    /// Spawns a supervisor against this sandbox.
    pub fn supervisor(&self) -> SupervisorHandle {
        self.supervisor_with(Vec::new())
    }

    pub fn supervisor_with(&self, initial: Vec<procvisor::Entry>) -> SupervisorHandle {
        Supervisor::spawn(
            Arc::clone(&self.cfg),
            self.bus.clone(),
            Arc::new(HttpProbe::new(self.cfg.probe_timeout)),
            initial,
        )
    }

    /// Writes a shell script into the sandbox and returns its path.
    pub fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, body).expect("write script");
        path
    }

    /// Start options that run the script with `/bin/sh`.
    pub fn sh_options(&self, name: &str) -> RequestOptions {
        RequestOptions {
            name: Some(name.to_string()),
            interpreter: Some("/bin/sh".to_string()),
            ..Default::default()
        }
    }
}

/// A long-running child that sleeps in short slices.
pub const LOOP_SCRIPT: &str = "while true; do sleep 0.2; done\n";

/// A child that fails fast with exit code 1.
pub const CRASH_SCRIPT: &str = "exit 1\n";

/// Builds a start request for a script path.
pub fn start_request(script: &std::path::Path, options: RequestOptions) -> Request {
    Request::new("start")
        .with_target(script.display().to_string())
        .with_options(options)
}

/// Extracts a string field from a reply's data object.
pub fn data_str<'r>(reply: &'r Reply, key: &str) -> Option<&'r str> {
    reply.data.as_ref()?.get(key)?.as_str()
}

/// Extracts an integer field from a reply's data object.
pub fn data_u64(reply: &Reply, key: &str) -> Option<u64> {
    reply.data.as_ref()?.get(key)?.as_u64()
}

/// Polls `probe` until it returns `Some` or the deadline passes.
pub async fn wait_until<T, F, Fut>(deadline: Duration, mut probe: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let end = tokio::time::Instant::now() + deadline;
    loop {
        if let Some(value) = probe().await {
            return Some(value);
        }
        if tokio::time::Instant::now() >= end {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
