//! # Snapshotter: atomic, debounced persistence of the registry.
//!
//! The supervisor calls [`Snapshotter::mark_dirty`] with a fresh
//! [`Snapshot`] after every mutation. A background task coalesces bursts:
//! the write happens once the queue has been quiet for the configured
//! debounce interval, and always writes the **latest** snapshot received.
//!
//! ## Write protocol
//! Serialize to `<file>.tmp`, then rename over `<file>` — an atomic
//! replace on POSIX, so readers observe either the old or the new file,
//! never a torn one.
//!
//! ## Load protocol
//! Parse the file if present. On parse failure the corrupt file is
//! quarantined to `<file>.backup` and an empty snapshot is returned; the
//! daemon never parses past the first failure.
//!
//! ## Rules
//! - Failures are logged and swallowed; the supervisor is never blocked
//!   or destabilized by persistence.
//! - A snapshot on disk reflects the registry at or after the dirty that
//!   triggered the write (latest-wins coalescing).

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::snapshot::Snapshot;

/// Handle to the debounced snapshot writer task.
#[derive(Clone)]
pub struct Snapshotter {
    tx: mpsc::UnboundedSender<Snapshot>,
    path: PathBuf,
}

impl Snapshotter {
    /// Spawns the writer task and returns its handle.
    pub fn spawn(path: PathBuf, debounce: Duration, token: CancellationToken) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_loop(path.clone(), debounce, rx, token));
        Self { tx, path }
    }

    /// Schedules a write of `snapshot` after the quiescent interval.
    /// Bursts coalesce; only the latest snapshot reaches disk.
    pub fn mark_dirty(&self, snapshot: Snapshot) {
        let _ = self.tx.send(snapshot);
    }

    /// Writes `snapshot` immediately, bypassing the debounce (used by the
    /// explicit `save` action and the shutdown flush).
    pub async fn write_now(&self, snapshot: &Snapshot) -> std::io::Result<()> {
        write_atomic(&self.path, snapshot).await
    }

    /// Path of the snapshot file this handle writes.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Loads the snapshot at `path`.
///
/// Missing file → empty snapshot. Corrupt file → quarantined to
/// `<path>.backup`, empty snapshot returned.
pub async fn load(path: &Path) -> Snapshot {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Snapshot::empty(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read snapshot");
            return Snapshot::empty();
        }
    };

    match serde_json::from_slice::<Snapshot>(&raw) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            let backup = backup_path(path);
            warn!(
                path = %path.display(),
                backup = %backup.display(),
                error = %e,
                "corrupt snapshot quarantined"
            );
            if let Err(e) = tokio::fs::rename(path, &backup).await {
                warn!(error = %e, "failed to quarantine corrupt snapshot");
            }
            Snapshot::empty()
        }
    }
}

/// `<file>.backup`, next to the snapshot.
fn backup_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".backup");
    PathBuf::from(os)
}

/// `<file>.tmp`, next to the snapshot.
fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

/// Serialize to the temp file, then rename over the target.
async fn write_atomic(path: &Path, snapshot: &Snapshot) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let raw = serde_json::to_vec_pretty(snapshot)?;
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, raw).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Drains dirties, waits out the quiescent interval, writes the latest.
async fn writer_loop(
    path: PathBuf,
    debounce: Duration,
    mut rx: mpsc::UnboundedReceiver<Snapshot>,
    token: CancellationToken,
) {
    loop {
        let first = tokio::select! {
            _ = token.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(s) => s,
                None => break,
            },
        };

        let mut latest = first;
        loop {
            match timeout(debounce, rx.recv()).await {
                Ok(Some(newer)) => latest = newer,
                // Sender gone: write what we have and stop.
                Ok(None) => {
                    flush(&path, &latest).await;
                    return;
                }
                // Quiet for a full debounce interval.
                Err(_) => break,
            }
        }
        flush(&path, &latest).await;
    }
}

async fn flush(path: &Path, snapshot: &Snapshot) {
    match write_atomic(path, snapshot).await {
        Ok(()) => debug!(path = %path.display(), entries = snapshot.entries.len(), "snapshot written"),
        Err(e) => warn!(path = %path.display(), error = %e, "snapshot write failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Entry, EntrySpec};

    fn snapshot_with(names: &[&str]) -> Snapshot {
        let mut s = Snapshot::empty();
        for (i, name) in names.iter().enumerate() {
            s.entries
                .push(Entry::new(format!("id{i:07}xx"), EntrySpec::new(*name, "app.js")));
        }
        s
    }

    #[tokio::test]
    async fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let snap = snapshot_with(&["api", "worker"]);

        write_atomic(&path, &snap).await.unwrap();
        let loaded = load(&path).await;

        assert_eq!(loaded, snap);
        assert!(!tmp_path(&path).exists(), "temp file must not survive");
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load(&dir.path().join("state.json")).await;
        assert!(loaded.entries.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let loaded = load(&path).await;

        assert!(loaded.entries.is_empty());
        assert!(!path.exists(), "corrupt file must be moved aside");
        assert!(backup_path(&path).exists());
    }

    #[tokio::test]
    async fn bursts_coalesce_to_the_latest_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let token = CancellationToken::new();
        let snapshotter =
            Snapshotter::spawn(path.clone(), Duration::from_millis(50), token.clone());

        for names in [&["a"][..], &["a", "b"], &["a", "b", "c"]] {
            snapshotter.mark_dirty(snapshot_with(names));
        }

        // Well past the quiescent interval.
        tokio::time::sleep(Duration::from_millis(400)).await;

        let loaded = load(&path).await;
        assert_eq!(loaded.entries.len(), 3, "latest snapshot wins");
        token.cancel();
    }
}
