//! The supervision engine: per-entry state machine, child process
//! contracts, and the single serialized queue every mutation flows
//! through.

mod child;
mod supervisor;

pub use child::{exit_parts, force_kill, spawn_child, terminate, Spawned};
pub use supervisor::{Supervisor, SupervisorHandle};
