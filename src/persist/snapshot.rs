//! # Snapshot: the persisted serialization of all entries.
//!
//! A [`Snapshot`] is what survives a daemon restart: version, capture
//! timestamp, and every retained [`Entry`]. Volatile fields (cpu, rss,
//! uptime) are serialized but carry no meaning after a restart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::{Entry, Registry};

/// Current snapshot schema version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Persisted registry state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Schema version for forward migrations.
    pub version: u32,
    /// Capture time.
    pub timestamp: DateTime<Utc>,
    /// Every retained entry at capture time.
    pub entries: Vec<Entry>,
}

impl Snapshot {
    /// Returns an empty snapshot at the current schema version.
    pub fn empty() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            timestamp: Utc::now(),
            entries: Vec::new(),
        }
    }

    /// Captures the registry as it stands.
    pub fn capture(registry: &Registry) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            timestamp: Utc::now(),
            entries: registry.list().into_iter().cloned().collect(),
        }
    }
}
