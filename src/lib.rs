//! # procvisor
//!
//! **Procvisor** is a local process supervisor: a long-lived daemon that
//! launches user-supplied programs, keeps them alive across crashes,
//! enforces resource budgets, captures their output, and exposes control
//! over a Unix socket to a thin CLI client. State survives daemon
//! restarts and, via init-system integration, host reboots.
//!
//! ## Architecture
//!
//! | Area              | Description                                                  | Key types                                    |
//! |-------------------|--------------------------------------------------------------|----------------------------------------------|
//! | **Supervision**   | Per-entry state machine over one serialized queue.           | [`Supervisor`], [`SupervisorHandle`]         |
//! | **Policies**      | Exponential backoff, crash-window loop detection.            | [`RestartPolicy`], [`Backoff`]               |
//! | **Registry**      | Authoritative single-writer map of supervised entries.       | [`Registry`], [`Entry`], [`EntrySpec`]       |
//! | **Persistence**   | Debounced atomic snapshots, per-entry crash journal.         | [`Snapshotter`], [`CrashJournal`]            |
//! | **Monitors**      | Resource sampling, path watching, readiness probing.         | [`monitor::MonitorEvent`], [`monitor::Probe`]|
//! | **Control plane** | Newline-framed JSON over a local socket.                     | [`Request`], [`Reply`], [`Client`]           |
//! | **Events**        | Broadcast bus for lifecycle and advisory events.             | [`Bus`], [`Event`], [`EventKind`]            |
//!
//! ```text
//! CLI ──socket──► ControlPlane ──queue──► Supervisor ──► Registry
//!                                             ▲   │
//!                    samplers / watchers / ───┘   ├──► children (spawn/signal)
//!                    probes / child waiters       ├──► LogSink (capture + rotation)
//!                                                 ├──► CrashJournal
//!                                                 └──► Snapshotter (atomic, debounced)
//! ```

pub mod config;
pub mod control;
pub mod daemon;
pub mod error;
pub mod events;
pub mod logs;
pub mod manifest;
pub mod monitor;
pub mod os_signals;
pub mod persist;
pub mod policies;
pub mod registry;
pub mod supervise;

// ---- Public re-exports ----

pub use config::{DaemonConfig, PRODUCT};
pub use control::{Client, Reply, Request, RequestOptions};
pub use error::{Error, Result};
pub use events::{Bus, Event, EventKind, LimitKind};
pub use persist::{CrashJournal, CrashRecord, Snapshot, Snapshotter};
pub use policies::{Backoff, RestartBook, RestartDecision, RestartPolicy};
pub use registry::{Entry, EntrySpec, EntryState, Registry, RestartReason};
pub use supervise::{Supervisor, SupervisorHandle};
