//! # Supervisor: the per-entry state machine behind the control plane.
//!
//! One worker task owns the [`Registry`] and drains a single FIFO queue.
//! Commands arrive with a oneshot reply channel; background facts (child
//! exits, stop timeouts, elapsed backoff timers) arrive on the same
//! queue, and monitor observations on a sibling channel — everything is
//! applied by this one task, so no command ever observes a partially
//! mutated entry.
//!
//! ## State machine
//! ```text
//!            start                    spawn ok
//!   (none) ────────► starting ───────────────────► running
//!                        │ spawn fail                 │
//!                        ▼                            │ stop cmd / threshold / file change
//!                    (deleted)                        ▼
//!                                                  stopping ── 10 s ──► SIGKILL
//!                                                     │ child exit
//!                          exit code≠0 ∨ signal       ▼
//!   running ────────────────────────► errored     stopped → (removed | respawned)
//!                                        │ policy grants, delay elapsed
//!                                        ▼
//!                                    restarting ──► starting ──► …
//! ```
//!
//! ## Rules
//! - Crash append always precedes policy evaluation, which precedes any
//!   scheduled restart.
//! - Generation counters guard against stale facts: a `ChildExit`,
//!   `StopTimeout` or `RestartDue` for a superseded child is ignored.
//! - Every registry mutation marks the snapshotter dirty; sampled
//!   metrics are volatile and do not.
//! - A denied restart leaves the entry in `errored`, retained for
//!   inspection. A clean exit retains the entry in `stopped` and frees
//!   its name.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::DaemonConfig;
use crate::control::{Action, Reply, Request, RequestOptions, TARGET_ALL};
use crate::daemon::startup;
use crate::error::Error;
use crate::events::{Bus, Event, EventKind, LimitKind};
use crate::logs::{self, LogSink, StreamKind};
use crate::monitor::{
    spawn_sampler, spawn_watcher, wait_ready, MonitorEvent, Probe, SamplerParams, WatchParams,
};
use crate::persist::{CrashJournal, CrashRecord, Snapshot, Snapshotter};
use crate::policies::{Backoff, DenyReason, RestartBook, RestartDecision, RestartPolicy};
use crate::registry::{Entry, EntryState, Registry, RestartReason};

use super::child::{exit_parts, force_kill, pump_stream, spawn_child, terminate};

/// Facts and commands drained by the supervisor task.
enum Msg {
    /// Control-plane command with its reply channel.
    Command {
        req: Request,
        reply: oneshot::Sender<Reply>,
    },
    /// A child process was reaped.
    ChildExit {
        id: String,
        gen: u64,
        code: Option<i32>,
        signal: Option<i32>,
    },
    /// The stop soft deadline elapsed.
    StopTimeout { id: String, gen: u64 },
    /// A granted restart's backoff delay elapsed.
    RestartDue { id: String, gen: u64 },
    /// Daemon shutdown: flush state, cancel monitors, stop draining.
    Shutdown { done: oneshot::Sender<()> },
}

/// Cloneable handle used by the control plane and the daemon.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::UnboundedSender<Msg>,
}

impl SupervisorHandle {
    /// Sends one command and waits for its committed reply.
    pub async fn dispatch(&self, req: Request) -> Reply {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Msg::Command { req, reply: tx }).is_err() {
            return Reply::fail("daemon is shutting down");
        }
        rx.await
            .unwrap_or_else(|_| Reply::fail("daemon dropped the request"))
    }

    /// Asks the supervisor to flush state and stop; resolves when done.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Msg::Shutdown { done: tx }).is_ok() {
            let _ = rx.await;
        }
    }
}

/// What to do once the current child exits.
enum Goal {
    /// Nothing commanded: a failure consults the restart policy.
    Keep,
    /// Remove the entry (stop/delete).
    Remove {
        group: Option<u64>,
        verb: &'static str,
    },
    /// Respawn with the same spec (manual restart, threshold, file
    /// change).
    Respawn {
        reason: RestartReason,
        group: Option<u64>,
    },
}

/// Per-entry runtime state never persisted.
struct EntryRuntime {
    /// Bumped on every spawn; facts carrying an older value are stale.
    gen: u64,
    /// Cancels this child's sampler, watcher and in-flight probe.
    monitors: CancellationToken,
    /// Output sink shared by the two pump tasks.
    sink: Option<Arc<Mutex<LogSink>>>,
    /// Restart bookkeeping.
    book: RestartBook,
    /// Per-entry policy (spec overrides applied).
    policy: RestartPolicy,
    /// Monotonic spawn time of the current child.
    started: Option<Instant>,
    /// Pending action for the next exit.
    goal: Goal,
}

impl EntryRuntime {
    fn new(cfg: &DaemonConfig, entry: &Entry) -> Self {
        let policy = RestartPolicy {
            backoff: Backoff {
                min: entry
                    .spec
                    .restart_delay
                    .map(std::time::Duration::from_millis)
                    .unwrap_or(cfg.restart_min_delay),
                max: cfg.restart_max_delay,
            },
            max_restarts: entry.spec.max_restarts.unwrap_or(cfg.max_restarts),
            window: cfg.crash_window,
            loop_threshold: cfg.crash_loop_threshold,
        };
        Self {
            gen: 0,
            monitors: CancellationToken::new(),
            sink: None,
            book: RestartBook::default(),
            policy,
            started: None,
            goal: Goal::Keep,
        }
    }
}

/// Aggregated reply over the parts of a multi-target command.
struct Group {
    reply: oneshot::Sender<Reply>,
    remaining: usize,
    lines: Vec<String>,
    ok: bool,
}

/// The single-writer supervision engine.
pub struct Supervisor {
    cfg: Arc<DaemonConfig>,
    bus: Bus,
    registry: Registry,
    runtime: HashMap<String, EntryRuntime>,
    groups: HashMap<u64, Group>,
    next_group: u64,
    snapshotter: Snapshotter,
    journal: CrashJournal,
    probe: Arc<dyn Probe>,
    tx: mpsc::UnboundedSender<Msg>,
    monitor_tx: mpsc::UnboundedSender<MonitorEvent>,
    token: CancellationToken,
}

impl Supervisor {
    /// Spawns the supervisor task, restoring `initial` entries first.
    /// Entries previously `running` are respawned with their saved spec;
    /// spawn failures are logged and the entry dropped.
    pub fn spawn(
        cfg: Arc<DaemonConfig>,
        bus: Bus,
        probe: Arc<dyn Probe>,
        initial: Vec<Entry>,
    ) -> SupervisorHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let (monitor_tx, monitor_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let supervisor = Supervisor {
            snapshotter: Snapshotter::spawn(
                cfg.state_file(),
                cfg.snapshot_debounce,
                token.clone(),
            ),
            journal: CrashJournal::new(cfg.data_dir.join("crashes"), cfg.crash_cap),
            registry: Registry::new(),
            runtime: HashMap::new(),
            groups: HashMap::new(),
            next_group: 0,
            bus,
            probe,
            tx: tx.clone(),
            monitor_tx,
            token,
            cfg,
        };

        tokio::spawn(supervisor.run(rx, monitor_rx, initial));
        SupervisorHandle { tx }
    }

    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<Msg>,
        mut monitor_rx: mpsc::UnboundedReceiver<MonitorEvent>,
        initial: Vec<Entry>,
    ) {
        self.restore(initial).await;

        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(Msg::Shutdown { done }) => {
                        self.finalize().await;
                        let _ = done.send(());
                        break;
                    }
                    Some(msg) => self.handle_msg(msg).await,
                    None => break,
                },
                Some(ev) = monitor_rx.recv() => self.handle_monitor(ev).await,
            }
        }
    }

    /// Re-seeds the registry from the last snapshot.
    async fn restore(&mut self, initial: Vec<Entry>) {
        let mut dirty = false;
        for mut entry in initial {
            let id = entry.id.clone();
            match entry.state {
                EntryState::Starting | EntryState::Running | EntryState::Restarting => {
                    entry.os_pid = 0;
                    entry.cpu_percent = 0.0;
                    entry.rss_bytes = 0;
                    entry.uptime_ms = 0;
                    entry.state = EntryState::Starting;
                    if let Err(e) = self.registry.add(entry) {
                        warn!(id = %id, error = %e, "restore skipped entry");
                        continue;
                    }
                    match self.spawn_wired(&id).await {
                        Ok(()) => info!(id = %id, "entry respawned from snapshot"),
                        Err(e) => {
                            warn!(id = %id, error = %e, "respawn from snapshot failed; entry dropped");
                            self.remove_entry(&id);
                        }
                    }
                    dirty = true;
                }
                EntryState::Errored | EntryState::Stopped => {
                    entry.note_exited(entry.state);
                    let state = entry.state;
                    if let Err(e) = self.registry.add(entry) {
                        warn!(id = %id, error = %e, "restore skipped entry");
                        continue;
                    }
                    let snapshot_entry = self.registry.get(&id).cloned();
                    if let Some(entry) = snapshot_entry {
                        self.runtime
                            .insert(id.clone(), EntryRuntime::new(&self.cfg, &entry));
                    }
                    info!(id = %id, state = state.as_str(), "entry restored for inspection");
                    dirty = true;
                }
                EntryState::Stopping => {
                    // A stop was in flight when the daemon died; the
                    // child is gone either way.
                }
            }
        }
        if dirty {
            self.mark_dirty();
        }
    }

    /// Flush state and cancel every background activity.
    async fn finalize(&mut self) {
        for rt in self.runtime.values() {
            rt.monitors.cancel();
        }
        let snapshot = Snapshot::capture(&self.registry);
        if let Err(e) = self.snapshotter.write_now(&snapshot).await {
            warn!(error = %e, "final snapshot write failed");
        }
        self.token.cancel();
    }

    fn mark_dirty(&self) {
        self.snapshotter.mark_dirty(Snapshot::capture(&self.registry));
    }

    fn publish(&self, event: Event) {
        self.bus.publish(event);
    }

    // ------------------------------------------------------------------
    // Queue handlers
    // ------------------------------------------------------------------

    async fn handle_msg(&mut self, msg: Msg) {
        match msg {
            Msg::Command { req, reply } => self.handle_command(req, reply).await,
            Msg::ChildExit {
                id,
                gen,
                code,
                signal,
            } => self.on_child_exit(&id, gen, code, signal).await,
            Msg::StopTimeout { id, gen } => self.on_stop_timeout(&id, gen),
            Msg::RestartDue { id, gen } => self.on_restart_due(&id, gen).await,
            Msg::Shutdown { .. } => unreachable!("handled by the run loop"),
        }
    }

    async fn handle_command(&mut self, req: Request, reply: oneshot::Sender<Reply>) {
        let Some(action) = Action::parse(&req.action) else {
            let _ = reply.send(Reply::fail(format!("Unknown command: {}", req.action)));
            return;
        };

        match action {
            Action::Ping => {
                let _ = reply.send(Reply::ok("pong"));
            }
            Action::Save => {
                let snapshot = Snapshot::capture(&self.registry);
                let count = snapshot.entries.len();
                let result = match self.snapshotter.write_now(&snapshot).await {
                    Ok(()) => Reply::ok(format!("State saved ({count} processes)")),
                    Err(e) => Reply::from_error(&Error::Io(e)),
                };
                let _ = reply.send(result);
            }
            Action::Status => {
                let _ = reply.send(self.cmd_status(req.target.as_deref()).await);
            }
            Action::Logs => {
                let result = self
                    .cmd_logs(req.target.as_deref(), req.options.as_ref())
                    .await;
                let _ = reply.send(result);
            }
            Action::Startup => {
                let result = match startup::install(&self.cfg).await {
                    Ok(path) => {
                        Reply::ok(format!("Startup unit installed: {}", path.display()))
                    }
                    Err(e) => Reply::from_error(&e),
                };
                let _ = reply.send(result);
            }
            Action::Unstartup => {
                let result = match startup::uninstall().await {
                    Ok(path) => Reply::ok(format!("Startup unit removed: {}", path.display())),
                    Err(e) => Reply::from_error(&e),
                };
                let _ = reply.send(result);
            }
            Action::Start => self.cmd_start(req, reply).await,
            Action::Stop => self.cmd_each(req, reply, PartKind::Stop).await,
            Action::Restart => self.cmd_each(req, reply, PartKind::Restart).await,
            Action::Delete => self.cmd_each(req, reply, PartKind::Delete).await,
        }
    }

    async fn handle_monitor(&mut self, ev: MonitorEvent) {
        match ev {
            MonitorEvent::Metrics { id, cpu_avg, rss } => {
                if let Some(entry) = self.registry.get_mut(&id) {
                    if entry.state.has_live_child() {
                        entry.cpu_percent = cpu_avg;
                        entry.rss_bytes = rss;
                    }
                }
            }
            MonitorEvent::Threshold {
                id,
                kind,
                current,
                limit,
            } => self.on_threshold(&id, kind, current, limit),
            MonitorEvent::MemoryWarning { id, rss, limit } => {
                if let Some(entry) = self.registry.get(&id) {
                    warn!(
                        id = %id,
                        name = %entry.name,
                        rss,
                        limit,
                        "memory above the advisory fraction of its limit"
                    );
                    self.publish(
                        Event::now(EventKind::MemoryWarning)
                            .with_id(&id)
                            .with_name(&entry.name)
                            .with_threshold(LimitKind::Memory, rss as f64, limit as f64),
                    );
                }
            }
            MonitorEvent::FileChange { id } => self.on_file_change(&id),
            MonitorEvent::ProbeResult { id, healthy } => {
                let Some(entry) = self.registry.get(&id) else {
                    return;
                };
                let kind = if healthy {
                    EventKind::ProbeReady
                } else {
                    warn!(
                        id = %id,
                        name = %entry.name,
                        "readiness probe exhausted its budget; entry stays running"
                    );
                    EventKind::ProbeFailed
                };
                self.publish(Event::now(kind).with_id(&id).with_name(&entry.name));
            }
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    async fn cmd_status(&mut self, target: Option<&str>) -> Reply {
        match target {
            None | Some(TARGET_ALL) => {
                for id in self.registry.ids() {
                    if let Some(entry) = self.registry.get_mut(&id) {
                        entry.refresh_uptime();
                    }
                }
                let entries: Vec<&Entry> = self.registry.list();
                let count = entries.len();
                let data = serde_json::to_value(&entries).unwrap_or_default();
                Reply::ok_with(format!("{count} processes"), data)
            }
            Some(target) => {
                let Some(id) = self.registry.resolve_id(target) else {
                    return Reply::from_error(&Error::NotFound {
                        target: target.to_string(),
                    });
                };
                if let Some(entry) = self.registry.get_mut(&id) {
                    entry.refresh_uptime();
                }
                let entry = self.registry.get(&id).expect("resolved id exists");
                let stats = self.journal.stats(&id).await;
                let mut data = serde_json::to_value(entry).unwrap_or_default();
                if let Some(map) = data.as_object_mut() {
                    map.insert(
                        "crashes".to_string(),
                        serde_json::to_value(&stats).unwrap_or_default(),
                    );
                }
                Reply::ok_with(format!("{} ({})", entry.name, entry.state.as_str()), data)
            }
        }
    }

    async fn cmd_logs(&mut self, target: Option<&str>, options: Option<&RequestOptions>) -> Reply {
        let Some(target) = target else {
            return Reply::fail("logs requires a target");
        };
        let Some(id) = self.registry.resolve_id(target) else {
            return Reply::from_error(&Error::NotFound {
                target: target.to_string(),
            });
        };
        let n = options
            .and_then(|o| o.lines)
            .unwrap_or(self.cfg.log_tail_default);
        let name = self.registry.get(&id).map(|e| e.name.clone()).unwrap_or_default();
        match logs::tail(&self.cfg.entry_log_dir(&id), n).await {
            Ok(lines) => Reply::ok_with(
                format!("Last {} lines of {name}", lines.len()),
                serde_json::json!({ "id": id, "name": name, "lines": lines }),
            ),
            Err(e) => Reply::from_error(&Error::Io(e)),
        }
    }

    async fn cmd_start(&mut self, req: Request, reply: oneshot::Sender<Reply>) {
        let Some(target) = req.target else {
            let _ = reply.send(Reply::fail("start requires a script or a process"));
            return;
        };

        // Reviving a retained entry takes precedence over script paths.
        if let Some(id) = self.registry.resolve_id(&target) {
            let _ = reply.send(self.revive(&id).await);
            return;
        }

        let script = PathBuf::from(&target);
        let options = req.options.unwrap_or_default();
        let spec = match options.into_spec(script) {
            Ok(spec) => spec,
            Err(e) => {
                let _ = reply.send(Reply::from_error(&e));
                return;
            }
        };

        let resolved = self.resolve_script(&spec.script, spec.cwd.as_deref());
        if !tokio::fs::try_exists(&resolved).await.unwrap_or(false) {
            let _ = reply.send(Reply::from_error(&Error::InvalidConfig {
                reason: format!("script not found: {}", resolved.display()),
            }));
            return;
        }

        let id = self.registry.generate_id();
        let entry = Entry::new(id.clone(), spec);
        let name = entry.name.clone();
        if let Err(e) = self.registry.add(entry) {
            let _ = reply.send(Reply::from_error(&e));
            return;
        }

        match self.spawn_wired(&id).await {
            Ok(()) => {
                self.mark_dirty();
                let data = self
                    .registry
                    .get(&id)
                    .and_then(|e| serde_json::to_value(e).ok());
                let mut ok = Reply::ok(format!("Process started: {name} ({id})"));
                ok.data = data;
                let _ = reply.send(ok);
            }
            Err(e) => {
                // A spawn failure leaves no zombie record behind.
                self.remove_entry(&id);
                let _ = reply.send(Reply::from_error(&e));
            }
        }
    }

    /// Respawns a retained (`errored`/`stopped`) entry on `start`.
    async fn revive(&mut self, id: &str) -> Reply {
        let Some(entry) = self.registry.get(id) else {
            return Reply::from_error(&Error::NotFound {
                target: id.to_string(),
            });
        };
        if entry.state.has_live_child() {
            return Reply::fail(format!("Process already running: {}", entry.name));
        }
        let name = entry.name.clone();
        if entry.state == EntryState::Stopped {
            if let Err(e) = self.registry.reclaim_name(id) {
                return Reply::from_error(&e);
            }
        }
        if let Some(rt) = self.runtime.get_mut(id) {
            let policy = rt.policy;
            policy.reset_attempts(&mut rt.book);
        }
        match self.spawn_wired(id).await {
            Ok(()) => {
                self.mark_dirty();
                Reply::ok(format!("Process started: {name} ({id})"))
            }
            Err(e) => {
                self.remove_entry(id);
                Reply::from_error(&e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Multi-target commands (stop / restart / delete)
    // ------------------------------------------------------------------

    async fn cmd_each(&mut self, req: Request, reply: oneshot::Sender<Reply>, kind: PartKind) {
        let Some(target) = req.target else {
            let _ = reply.send(Reply::fail(format!("{} requires a target", req.action)));
            return;
        };

        let ids: Vec<String> = if target == TARGET_ALL {
            self.registry.ids()
        } else {
            match self.registry.resolve_id(&target) {
                Some(id) => vec![id],
                None => {
                    let _ = reply.send(Reply::from_error(&Error::NotFound { target }));
                    return;
                }
            }
        };

        if ids.is_empty() {
            let _ = reply.send(Reply::ok("No processes"));
            return;
        }

        let group = self.open_group(reply, ids.len());
        for id in ids {
            match kind {
                PartKind::Stop => self.part_stop(&id, group, "stopped"),
                PartKind::Delete => self.part_stop(&id, group, "deleted"),
                PartKind::Restart => self.part_restart(&id, group).await,
            }
        }
    }

    fn open_group(&mut self, reply: oneshot::Sender<Reply>, parts: usize) -> u64 {
        self.next_group += 1;
        self.groups.insert(
            self.next_group,
            Group {
                reply,
                remaining: parts,
                lines: Vec::new(),
                ok: true,
            },
        );
        self.next_group
    }

    fn complete_part(&mut self, group: u64, ok: bool, line: String) {
        let Some(g) = self.groups.get_mut(&group) else {
            return;
        };
        g.ok &= ok;
        g.lines.push(line);
        g.remaining -= 1;
        if g.remaining == 0 {
            let g = self.groups.remove(&group).expect("group present");
            let message = g.lines.join("; ");
            let _ = g.reply.send(Reply {
                success: g.ok,
                message,
                data: None,
            });
        }
    }

    /// One stop/delete part. Live children go through the stop contract;
    /// retained entries are removed immediately.
    fn part_stop(&mut self, id: &str, group: u64, verb: &'static str) {
        let Some(entry) = self.registry.get(id) else {
            self.complete_part(group, false, format!("process not found: {id}"));
            return;
        };
        let name = entry.name.clone();

        if entry.state == EntryState::Stopping {
            self.complete_part(group, false, format!("Already stopping: {name}"));
            return;
        }
        if entry.state.has_live_child() {
            self.begin_stop(
                id,
                Goal::Remove {
                    group: Some(group),
                    verb,
                },
            );
            return;
        }

        // No live child: removal is immediate.
        self.remove_entry(id);
        self.mark_dirty();
        self.complete_part(group, true, format!("Process {verb}: {name}"));
    }

    /// One restart part. Live children are stopped then respawned;
    /// retained entries are respawned directly.
    async fn part_restart(&mut self, id: &str, group: u64) {
        let Some(entry) = self.registry.get(id) else {
            self.complete_part(group, false, format!("process not found: {id}"));
            return;
        };
        let name = entry.name.clone();

        if entry.state == EntryState::Stopping {
            self.complete_part(group, false, format!("Already stopping: {name}"));
            return;
        }
        if entry.state.has_live_child() {
            self.begin_stop(
                id,
                Goal::Respawn {
                    reason: RestartReason::Manual,
                    group: Some(group),
                },
            );
            return;
        }

        // Retained entry: revive in place.
        if entry.state == EntryState::Stopped {
            if let Err(e) = self.registry.reclaim_name(id) {
                self.complete_part(group, false, e.to_string());
                return;
            }
        }
        self.apply_restart_accounting(id, RestartReason::Manual);
        match self.spawn_wired(id).await {
            Ok(()) => {
                self.mark_dirty();
                self.complete_part(group, true, format!("Process restarted: {name}"));
            }
            Err(e) => {
                self.remove_entry(id);
                self.mark_dirty();
                self.complete_part(group, false, e.to_string());
            }
        }
    }

    /// Transitions a live entry into `stopping` and arms the kill timer.
    fn begin_stop(&mut self, id: &str, goal: Goal) {
        let Some(entry) = self.registry.get_mut(id) else {
            return;
        };
        let pid = entry.os_pid;
        let name = entry.name.clone();
        entry.state = EntryState::Stopping;

        if let Some(rt) = self.runtime.get_mut(id) {
            rt.goal = goal;
            let gen = rt.gen;
            let tx = self.tx.clone();
            let id = id.to_string();
            let grace = self.cfg.stop_grace;
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                let _ = tx.send(Msg::StopTimeout { id, gen });
            });
        }

        self.publish(Event::now(EventKind::Stopping).with_id(id).with_name(&name));
        if let Err(e) = terminate(pid) {
            warn!(id, pid, error = %e, "SIGTERM delivery failed; escalating");
            force_kill(pid);
        }
        self.mark_dirty();
    }

    // ------------------------------------------------------------------
    // Background facts
    // ------------------------------------------------------------------

    async fn on_child_exit(&mut self, id: &str, gen: u64, code: Option<i32>, signal: Option<i32>) {
        let Some(rt) = self.runtime.get_mut(id) else {
            return;
        };
        if rt.gen != gen {
            return;
        }

        rt.monitors.cancel();
        rt.monitors = CancellationToken::new();
        if let Some(sink) = rt.sink.take() {
            let _ = sink.lock().await.flush().await;
        }
        let uptime = rt.started.take().map(|t| t.elapsed()).unwrap_or_default();
        let goal = std::mem::replace(&mut rt.goal, Goal::Keep);
        let clean = code == Some(0) && signal.is_none();

        match goal {
            Goal::Remove { group, verb } => {
                let name = self
                    .registry
                    .get(id)
                    .map(|e| e.name.clone())
                    .unwrap_or_default();
                self.remove_entry(id);
                self.mark_dirty();
                self.publish(Event::now(EventKind::Stopped).with_id(id).with_name(&name));
                if let Some(group) = group {
                    self.complete_part(group, true, format!("Process {verb}: {name}"));
                }
            }
            Goal::Respawn { reason, group } => {
                let name = self
                    .registry
                    .get(id)
                    .map(|e| e.name.clone())
                    .unwrap_or_default();
                self.apply_restart_accounting(id, reason);
                match self.spawn_wired(id).await {
                    Ok(()) => {
                        self.mark_dirty();
                        if let Some(group) = group {
                            self.complete_part(group, true, format!("Process restarted: {name}"));
                        }
                    }
                    Err(e) => {
                        error!(id, name = %name, error = %e, "respawn failed; entry dropped");
                        self.remove_entry(id);
                        self.mark_dirty();
                        if let Some(group) = group {
                            self.complete_part(group, false, e.to_string());
                        }
                    }
                }
            }
            Goal::Keep if clean => {
                if let Some(entry) = self.registry.get_mut(id) {
                    entry.note_exited(EntryState::Stopped);
                    let name = entry.name.clone();
                    self.registry.release_name(id);
                    info!(id, name = %name, "child exited cleanly; entry retained as stopped");
                    self.publish(Event::now(EventKind::Stopped).with_id(id).with_name(&name));
                }
                self.mark_dirty();
            }
            Goal::Keep => {
                self.on_crash(id, code, signal, uptime).await;
            }
        }
    }

    /// Crash path: journal first, then the policy, then the schedule.
    async fn on_crash(
        &mut self,
        id: &str,
        code: Option<i32>,
        signal: Option<i32>,
        uptime: std::time::Duration,
    ) {
        let Some(entry) = self.registry.get_mut(id) else {
            return;
        };
        let name = entry.name.clone();
        let record = CrashRecord {
            timestamp: chrono::Utc::now(),
            id: id.to_string(),
            name: name.clone(),
            exit_code: code,
            signal,
            cpu_percent: entry.cpu_percent,
            rss_bytes: entry.rss_bytes,
            uptime_ms: uptime.as_millis() as u64,
            restart_count: entry.restart_count,
        };
        entry.note_exited(EntryState::Errored);
        warn!(id, name = %name, ?code, ?signal, "child exited abnormally");
        self.publish(
            Event::now(EventKind::Errored)
                .with_id(id)
                .with_name(&name)
                .with_reason(format!("code={code:?} signal={signal:?}")),
        );

        if let Err(e) = self.journal.append(record).await {
            warn!(id, error = %e, "crash journal append failed");
        }

        let Some(rt) = self.runtime.get_mut(id) else {
            return;
        };
        if uptime >= self.cfg.healthy_uptime {
            let policy = rt.policy;
            policy.reset_attempts(&mut rt.book);
        }

        let decision = rt.policy.on_exit(&mut rt.book, false, Instant::now());
        let gen = rt.gen;
        match decision {
            RestartDecision::Grant { delay } => {
                self.publish(
                    Event::now(EventKind::BackoffScheduled)
                        .with_id(id)
                        .with_name(&name)
                        .with_delay(delay),
                );
                let tx = self.tx.clone();
                let id = id.to_string();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Msg::RestartDue { id, gen });
                });
            }
            RestartDecision::Deny(reason) => {
                let kind = match reason {
                    DenyReason::CrashLoop => EventKind::CrashLoop,
                    DenyReason::MaxRestarts => EventKind::MaxRestarts,
                    DenyReason::CleanExit => EventKind::Stopped,
                };
                warn!(id, name = %name, reason = reason.as_label(), "restart denied");
                self.publish(
                    Event::now(kind)
                        .with_id(id)
                        .with_name(&name)
                        .with_reason(reason.as_label()),
                );
            }
        }
        self.mark_dirty();
    }

    fn on_stop_timeout(&mut self, id: &str, gen: u64) {
        let Some(rt) = self.runtime.get(id) else {
            return;
        };
        if rt.gen != gen {
            return;
        }
        if let Some(entry) = self.registry.get(id) {
            if entry.state == EntryState::Stopping && entry.os_pid > 0 {
                warn!(id, pid = entry.os_pid, "stop deadline elapsed; sending SIGKILL");
                force_kill(entry.os_pid);
            }
        }
    }

    async fn on_restart_due(&mut self, id: &str, gen: u64) {
        let Some(rt) = self.runtime.get(id) else {
            return;
        };
        if rt.gen != gen {
            return;
        }
        let Some(entry) = self.registry.get(id) else {
            return;
        };
        if entry.state != EntryState::Errored {
            return;
        }
        let name = entry.name.clone();

        self.publish(
            Event::now(EventKind::Restarting)
                .with_id(id)
                .with_name(&name)
                .with_reason(RestartReason::Crash.as_str()),
        );
        self.apply_restart_accounting(id, RestartReason::Crash);
        match self.spawn_wired(id).await {
            Ok(()) => self.mark_dirty(),
            Err(e) => {
                error!(id, name = %name, error = %e, "scheduled respawn failed; entry dropped");
                self.remove_entry(id);
                self.mark_dirty();
            }
        }
    }

    fn on_threshold(&mut self, id: &str, kind: LimitKind, current: f64, limit: f64) {
        let Some(entry) = self.registry.get(id) else {
            return;
        };
        if entry.state != EntryState::Running {
            return;
        }
        let name = entry.name.clone();
        warn!(
            id,
            name = %name,
            resource = kind.as_str(),
            current,
            limit,
            "resource threshold exceeded; restarting"
        );
        self.publish(
            Event::now(EventKind::ThresholdExceeded)
                .with_id(id)
                .with_name(&name)
                .with_threshold(kind, current, limit),
        );
        let reason = match kind {
            LimitKind::Memory => RestartReason::Memory,
            LimitKind::Cpu => RestartReason::Cpu,
        };
        self.begin_stop(
            id,
            Goal::Respawn {
                reason,
                group: None,
            },
        );
    }

    fn on_file_change(&mut self, id: &str) {
        let Some(entry) = self.registry.get(id) else {
            return;
        };
        if entry.state != EntryState::Running {
            return;
        }
        let name = entry.name.clone();
        info!(id, name = %name, "watched path changed; restarting");
        self.publish(Event::now(EventKind::FileChange).with_id(id).with_name(&name));
        self.begin_stop(
            id,
            Goal::Respawn {
                reason: RestartReason::FileChange,
                group: None,
            },
        );
    }

    // ------------------------------------------------------------------
    // Spawn plumbing
    // ------------------------------------------------------------------

    /// Records a restart on the entry; a manual restart also resets the
    /// consecutive-failure counter (fresh operator intent).
    fn apply_restart_accounting(&mut self, id: &str, reason: RestartReason) {
        if let Some(entry) = self.registry.get_mut(id) {
            entry.state = EntryState::Restarting;
            entry.note_restart(reason);
        }
        if reason == RestartReason::Manual {
            if let Some(rt) = self.runtime.get_mut(id) {
                let policy = rt.policy;
                policy.reset_attempts(&mut rt.book);
            }
        }
    }

    fn resolve_script(&self, script: &std::path::Path, cwd: Option<&std::path::Path>) -> PathBuf {
        if script.is_absolute() {
            return script.to_path_buf();
        }
        let base = cwd
            .map(|p| p.to_path_buf())
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        base.join(script)
    }

    /// Spawns the entry's child and wires log capture, the sampler, the
    /// watcher and the optional readiness probe.
    async fn spawn_wired(&mut self, id: &str) -> crate::error::Result<()> {
        let Some(entry) = self.registry.get_mut(id) else {
            return Err(Error::NotFound {
                target: id.to_string(),
            });
        };
        entry.state = EntryState::Starting;
        let name = entry.name.clone();
        let spec = entry.spec.clone();
        self.publish(Event::now(EventKind::Starting).with_id(id).with_name(&name));

        let interpreter = spec
            .interpreter
            .clone()
            .unwrap_or_else(|| self.cfg.interpreter.clone());
        let mut spawned = spawn_child(&interpreter, &spec)?;
        let pid = spawned.pid;

        let rt = self.runtime.entry(id.to_string()).or_insert_with(|| {
            EntryRuntime::new(
                &self.cfg,
                self.registry
                    .get(id)
                    .expect("entry present while spawning"),
            )
        });
        rt.gen += 1;
        rt.monitors = CancellationToken::new();
        rt.started = Some(Instant::now());
        rt.goal = Goal::Keep;
        let gen = rt.gen;
        let monitors = rt.monitors.clone();

        // Log capture for both streams.
        let sink = match LogSink::open(
            self.cfg.entry_log_dir(id),
            id,
            &name,
            spec.log_format,
            spec.log_output,
            self.cfg.log_max_bytes,
            self.cfg.log_max_files,
        )
        .await
        {
            Ok(sink) => Some(Arc::new(Mutex::new(sink))),
            Err(e) => {
                warn!(id, error = %e, "log sink unavailable; output discarded");
                None
            }
        };
        rt.sink = sink.clone();
        if let Some(stdout) = spawned.child.stdout.take() {
            pump_stream(stdout, sink.clone(), StreamKind::Stdout);
        }
        if let Some(stderr) = spawned.child.stderr.take() {
            pump_stream(stderr, sink, StreamKind::Stderr);
        }

        // The waiter delivers the exit as a queue fact.
        let tx = self.tx.clone();
        let waiter_id = id.to_string();
        let mut child = spawned.child;
        tokio::spawn(async move {
            let (code, signal) = match child.wait().await {
                Ok(status) => exit_parts(status),
                Err(_) => (None, None),
            };
            let _ = tx.send(Msg::ChildExit {
                id: waiter_id,
                gen,
                code,
                signal,
            });
        });

        // Resource sampling runs for every live entry.
        spawn_sampler(
            SamplerParams {
                id: id.to_string(),
                pid,
                mem_limit: spec.memory_limit,
                cpu_limit: spec.cpu_limit,
                interval: self.cfg.sample_interval,
                ring: self.cfg.sample_ring,
                cpu_window: self.cfg.cpu_mean_window,
                mem_trip: self.cfg.mem_trip_samples,
                cpu_trip: self.cfg.cpu_trip_samples,
                warn_ratio: self.cfg.mem_warn_ratio,
            },
            self.monitor_tx.clone(),
            monitors.clone(),
        );

        // Path watching, when requested.
        if spec.watch {
            let resolved = self.resolve_script(&spec.script, spec.cwd.as_deref());
            let root = resolved
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."));
            spawn_watcher(
                WatchParams {
                    id: id.to_string(),
                    root,
                    ignore: spec.watch_ignore.clone(),
                    data_dir: self.cfg.data_dir.clone(),
                    poll: self.cfg.watch_poll_interval,
                    debounce: self.cfg.watch_debounce,
                },
                self.monitor_tx.clone(),
                monitors.clone(),
            );
        }

        // Optional readiness gate; the outcome is advisory.
        if let Some(url) = spec.health_check.clone() {
            let probe = Arc::clone(&self.probe);
            let tx = self.monitor_tx.clone();
            let probe_id = id.to_string();
            let budget = self.cfg.ready_budget;
            let attempts = self.cfg.probe_attempts;
            let gap = self.cfg.probe_gap;
            tokio::spawn(async move {
                let healthy = tokio::select! {
                    _ = monitors.cancelled() => return,
                    healthy = wait_ready(&*probe, &url, budget, attempts, gap) => healthy,
                };
                let _ = tx.send(MonitorEvent::ProbeResult {
                    id: probe_id,
                    healthy,
                });
            });
        }

        if let Some(entry) = self.registry.get_mut(id) {
            entry.note_spawned(pid);
        }
        info!(id, name = %name, pid, "child spawned");
        self.publish(Event::now(EventKind::Running).with_id(id).with_name(&name));
        Ok(())
    }

    /// Drops the entry and its runtime, cancelling monitors.
    fn remove_entry(&mut self, id: &str) {
        if let Some(rt) = self.runtime.remove(id) {
            rt.monitors.cancel();
        }
        self.registry.remove(id);
    }
}

/// Which per-entry part a multi-target command runs.
#[derive(Clone, Copy)]
enum PartKind {
    Stop,
    Restart,
    Delete,
}
