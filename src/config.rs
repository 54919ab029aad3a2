//! # Global daemon configuration.
//!
//! Provides [`DaemonConfig`] — centralized settings for the supervisor
//! runtime, constructed once at daemon startup and shared immutably.
//!
//! Config is used in three ways:
//! 1. **Daemon bootstrap**: paths (data dir, pid file, control socket)
//! 2. **Supervisor defaults**: restart parameters inherited by entries
//!    that do not override them
//! 3. **Background tasks**: sampling, watching, snapshot and rotation
//!    intervals and thresholds
//!
//! ## Environment overrides
//! A few values can be overridden through the environment so tests can run
//! against a scratch directory without touching source-level constants:
//! - `PROCVISOR_DATA_DIR` — data directory (default `~/.procvisor`)
//! - `PROCVISOR_SOCKET` — control socket path (default `/tmp/procvisor.sock`)

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Product name; names the data directory, socket and init-system units.
pub const PRODUCT: &str = "procvisor";

/// Global configuration for the supervisor daemon.
///
/// Defines:
/// - **Filesystem layout**: data directory, control socket
/// - **Persistence behavior**: snapshot debounce, crash journal cap
/// - **Monitoring cadence**: sample tick, watch polling and debounce
/// - **Lifecycle deadlines**: stop grace, shutdown watchdog
/// - **Restart defaults**: backoff bounds, max restarts, crash window
#[derive(Clone, Debug)]
pub struct DaemonConfig {
    /// Root of all persistent state (`~/.procvisor` by default).
    pub data_dir: PathBuf,
    /// Unix socket the control plane listens on.
    pub socket_path: PathBuf,
    /// Interpreter used to launch scripts when the spec does not name one.
    pub interpreter: String,

    /// Quiescent interval before a dirty registry is written to disk.
    pub snapshot_debounce: Duration,
    /// Resource sampling tick.
    pub sample_interval: Duration,
    /// How often the path watcher rescans the watched tree.
    pub watch_poll_interval: Duration,
    /// Trailing-edge debounce for file-change bursts.
    pub watch_debounce: Duration,
    /// Soft deadline between SIGTERM and SIGKILL when stopping a child.
    pub stop_grace: Duration,
    /// Watchdog deadline for the daemon's own graceful shutdown.
    pub shutdown_grace: Duration,

    /// Log file size that triggers rotation.
    pub log_max_bytes: u64,
    /// Number of rotated log files kept per entry (`app.log.1..N`).
    pub log_max_files: u32,
    /// Default number of lines returned by the `logs` action.
    pub log_tail_default: usize,

    /// Maximum crash records retained per entry.
    pub crash_cap: usize,
    /// Sliding window over which crashes are counted for loop detection.
    pub crash_window: Duration,
    /// Crashes within the window that trip the crash-loop cut-off.
    pub crash_loop_threshold: usize,

    /// Consecutive exceeding samples before a memory threshold event fires.
    pub mem_trip_samples: u32,
    /// Consecutive exceeding samples before a CPU threshold event fires.
    pub cpu_trip_samples: u32,
    /// Fraction of the memory limit above which an advisory warning fires.
    pub mem_warn_ratio: f64,
    /// Samples retained in the per-entry metrics ring buffer.
    pub sample_ring: usize,
    /// Samples averaged for the CPU rolling mean.
    pub cpu_mean_window: usize,

    /// Per-request transport timeout for health probes.
    pub probe_timeout: Duration,
    /// Gap between readiness probe attempts.
    pub probe_gap: Duration,
    /// Maximum readiness probe attempts within the overall budget.
    pub probe_attempts: u32,
    /// Overall readiness budget applied at entry start.
    pub ready_budget: Duration,

    /// Run length after which a child counts as healthy and the
    /// consecutive-failure counter resets.
    pub healthy_uptime: Duration,
    /// Initial restart delay (doubled per consecutive failed start).
    pub restart_min_delay: Duration,
    /// Cap on the computed restart delay.
    pub restart_max_delay: Duration,
    /// Consecutive failed starts tolerated before restarts are denied.
    pub max_restarts: u32,

    /// Client-side ceiling on a single control-plane request.
    pub request_ceiling: Duration,
    /// Capacity of the event bus broadcast channel.
    pub bus_capacity: usize,
}

impl DaemonConfig {
    /// Resolves the effective configuration: defaults, home-relative data
    /// directory, environment overrides.
    pub fn resolve() -> Self {
        let mut cfg = Self::default();
        if let Some(home) = dirs::home_dir() {
            cfg.data_dir = home.join(format!(".{PRODUCT}"));
        }
        if let Ok(dir) = std::env::var("PROCVISOR_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Ok(sock) = std::env::var("PROCVISOR_SOCKET") {
            cfg.socket_path = PathBuf::from(sock);
        }
        cfg
    }

    /// Path of the daemon pid file.
    #[inline]
    pub fn pid_file(&self) -> PathBuf {
        self.data_dir.join("daemon.pid")
    }

    /// Path of the daemon's own append-only log.
    #[inline]
    pub fn daemon_log(&self) -> PathBuf {
        self.data_dir.join("daemon.log")
    }

    /// Path of the persisted registry snapshot.
    #[inline]
    pub fn state_file(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    /// Directory holding one entry's captured output.
    #[inline]
    pub fn entry_log_dir(&self, id: &str) -> PathBuf {
        self.data_dir.join("logs").join(id)
    }

    /// Path of one entry's crash journal.
    #[inline]
    pub fn crash_file(&self, id: &str) -> PathBuf {
        self.data_dir.join("crashes").join(format!("{id}.json"))
    }

    /// True when `path` lies inside the supervisor's own data directory.
    #[inline]
    pub fn owns_path(&self, path: &Path) -> bool {
        path.starts_with(&self.data_dir)
    }
}

impl Default for DaemonConfig {
    /// Default configuration:
    ///
    /// - data under `~/.procvisor`, socket at `/tmp/procvisor.sock`
    /// - `node` interpreter
    /// - 1 s snapshot debounce, 5 s sample tick, 500 ms watch debounce
    /// - 10 s stop grace and shutdown watchdog
    /// - 10 MiB / 5-file log rotation, 100-record crash journal
    /// - restart backoff 1 s → 30 s, 10 max restarts, 60 s crash window
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(format!(".{PRODUCT}")),
            socket_path: PathBuf::from(format!("/tmp/{PRODUCT}.sock")),
            interpreter: "node".to_string(),

            snapshot_debounce: Duration::from_secs(1),
            sample_interval: Duration::from_secs(5),
            watch_poll_interval: Duration::from_millis(200),
            watch_debounce: Duration::from_millis(500),
            stop_grace: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(10),

            log_max_bytes: 10 * 1024 * 1024,
            log_max_files: 5,
            log_tail_default: 20,

            crash_cap: 100,
            crash_window: Duration::from_secs(60),
            crash_loop_threshold: 5,

            mem_trip_samples: 3,
            cpu_trip_samples: 5,
            mem_warn_ratio: 0.8,
            sample_ring: 60,
            cpu_mean_window: 3,

            probe_timeout: Duration::from_secs(5),
            probe_gap: Duration::from_secs(2),
            probe_attempts: 3,
            ready_budget: Duration::from_secs(10),

            healthy_uptime: Duration::from_millis(1000),
            restart_min_delay: Duration::from_millis(1000),
            restart_max_delay: Duration::from_millis(30_000),
            max_restarts: 10,

            request_ceiling: Duration::from_secs(10),
            bus_capacity: 1024,
        }
    }
}
