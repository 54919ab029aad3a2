//! # Daemon skeleton: bootstrap, signal handling, restore, shutdown.
//!
//! Boot order:
//! 1. ensure the data directory exists
//! 2. claim the pid file (abort with `AlreadyRunning` if another daemon
//!    owns it)
//! 3. open `daemon.log` and install the tracing subscriber
//! 4. load the last snapshot and hand it to the supervisor (previously
//!    `running` entries respawn; failures are logged and dropped)
//! 5. bind the control socket
//!
//! On SIGTERM/SIGINT: stop the control plane, let the supervisor flush a
//! final snapshot and cancel its monitors, remove the pid file, exit. A
//! 10 s watchdog force-exits the process if the graceful path stalls.

pub mod pidfile;
pub mod startup;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::DaemonConfig;
use crate::control;
use crate::error::Result;
use crate::events::{Bus, Event, EventKind};
use crate::monitor::HttpProbe;
use crate::os_signals::wait_for_shutdown_signal;
use crate::persist;
use crate::supervise::Supervisor;

/// Installs the tracing subscriber writing to `daemon.log`.
///
/// `RUST_LOG` overrides the default `info` filter. Re-initialization (in
/// tests) is tolerated.
fn init_logging(cfg: &DaemonConfig) -> Result<()> {
    use tracing_subscriber::EnvFilter;

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(cfg.daemon_log())?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(file))
        .try_init();
    Ok(())
}

/// Mirrors bus events into the daemon log.
fn spawn_event_logger(bus: &Bus, token: CancellationToken) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                ev = rx.recv() => match ev {
                    Ok(ev) => log_event(&ev),
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                },
            }
        }
    });
}

fn log_event(ev: &Event) {
    let id = ev.id.as_deref().unwrap_or("-");
    let name = ev.name.as_deref().unwrap_or("-");
    match ev.kind {
        EventKind::CrashLoop | EventKind::MaxRestarts | EventKind::ThresholdExceeded => {
            warn!(id, name, kind = ?ev.kind, reason = ev.reason.as_deref(), "supervisor event");
        }
        _ => {
            info!(id, name, kind = ?ev.kind, reason = ev.reason.as_deref(), "supervisor event");
        }
    }
}

/// Runs the daemon until a termination signal arrives.
pub async fn run(cfg: DaemonConfig) -> Result<()> {
    let cfg = Arc::new(cfg);
    tokio::fs::create_dir_all(&cfg.data_dir).await?;

    pidfile::acquire(&cfg.pid_file()).await?;
    init_logging(&cfg)?;
    info!(pid = std::process::id(), data_dir = %cfg.data_dir.display(), "daemon starting");

    let token = CancellationToken::new();
    let bus = Bus::new(cfg.bus_capacity);
    spawn_event_logger(&bus, token.clone());

    let snapshot = persist::load_snapshot(&cfg.state_file()).await;
    if !snapshot.entries.is_empty() {
        info!(entries = snapshot.entries.len(), "snapshot loaded");
    }

    let probe = Arc::new(HttpProbe::new(cfg.probe_timeout));
    let supervisor = Supervisor::spawn(Arc::clone(&cfg), bus.clone(), probe, snapshot.entries);

    let server = tokio::spawn(control::serve(
        cfg.socket_path.clone(),
        supervisor.clone(),
        token.clone(),
    ));

    if let Err(e) = wait_for_shutdown_signal().await {
        error!(error = %e, "signal registration failed; shutting down");
    }
    info!("termination signal received");
    bus.publish(Event::now(EventKind::ShutdownRequested));

    // Watchdog: a stalled graceful shutdown must not wedge the host's
    // service manager.
    let grace = cfg.shutdown_grace;
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        error!("graceful shutdown stalled; forcing exit");
        std::process::exit(1);
    });

    token.cancel();
    if let Ok(Err(e)) = server.await {
        warn!(error = %e, "control plane exited with error");
    }
    supervisor.shutdown().await;

    pidfile::release(&cfg.pid_file()).await;
    info!("daemon stopped");
    Ok(())
}
