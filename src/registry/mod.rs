//! Entry model and the single-writer registry.

mod core;
mod entry;

pub use self::core::Registry;
pub use entry::{Entry, EntrySpec, EntryState, LogFormat, LogOutput, RestartReason};
