//! Durable state: registry snapshots and the crash journal.

mod crash_journal;
mod snapshot;
mod snapshotter;

pub use crash_journal::{CrashJournal, CrashRecord, CrashStats};
pub use snapshot::{Snapshot, SNAPSHOT_VERSION};
pub use snapshotter::{load as load_snapshot, Snapshotter};
