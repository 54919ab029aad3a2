//! # PathWatcher: debounced filesystem-change detection.
//!
//! One cancellable task per watched entry. The watcher rescans the
//! script's directory recursively on a short poll interval, diffing
//! mtimes/sizes against the previous scan. Any add/change/delete marks a
//! pending change; the change event is reported once the tree has been
//! quiet for the debounce interval (trailing-edge debounce), so a burst
//! of N writes collapses to exactly one event.
//!
//! ## Ignores
//! The union of built-in patterns (`node_modules`, `.git`, `logs`,
//! `*.log`, the supervisor's own data directory) and spec-supplied
//! patterns. A pattern without a wildcard matches a path component
//! exactly; `*suffix` / `prefix*` match component fragments.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::MonitorEvent;

/// Ignore patterns applied to every watched tree.
pub const BUILTIN_IGNORES: &[&str] = &["node_modules", ".git", "logs", "*.log"];

/// Parameters for one entry's watcher task.
#[derive(Debug, Clone)]
pub struct WatchParams {
    /// Entry id the change events belong to.
    pub id: String,
    /// Directory watched recursively (the script's directory).
    pub root: PathBuf,
    /// Spec-supplied ignore patterns, merged with the built-ins.
    pub ignore: Vec<String>,
    /// The supervisor's data directory, always ignored.
    pub data_dir: PathBuf,
    /// Rescan interval.
    pub poll: Duration,
    /// Trailing-edge debounce interval.
    pub debounce: Duration,
}

/// True when `pattern` matches the path component `name`.
///
/// Supports exact matches and a single leading or trailing `*`.
fn pattern_matches(name: &str, pattern: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix('*') {
        name.ends_with(suffix)
    } else if let Some(prefix) = pattern.strip_suffix('*') {
        name.starts_with(prefix)
    } else {
        name == pattern
    }
}

/// True when any component of `path` matches any pattern, or the path
/// lies inside the data directory.
fn is_ignored(path: &Path, patterns: &[String], data_dir: &Path) -> bool {
    if path.starts_with(data_dir) {
        return true;
    }
    path.components().any(|c| {
        let name = c.as_os_str().to_string_lossy();
        patterns.iter().any(|p| pattern_matches(&name, p))
    })
}

/// Fingerprint of one scanned file.
type Fingerprint = (SystemTime, u64);

/// Recursively scans `root`, returning a fingerprint per visible file.
async fn scan(root: &Path, patterns: &[String], data_dir: &Path) -> HashMap<PathBuf, Fingerprint> {
    let mut out = HashMap::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let Ok(mut rd) = tokio::fs::read_dir(&dir).await else {
            continue;
        };
        while let Ok(Some(dent)) = rd.next_entry().await {
            let path = dent.path();
            if is_ignored(&path, patterns, data_dir) {
                continue;
            }
            let Ok(meta) = dent.metadata().await else {
                continue;
            };
            if meta.is_dir() {
                stack.push(path);
            } else if let Ok(mtime) = meta.modified() {
                out.insert(path, (mtime, meta.len()));
            }
        }
    }
    out
}

/// Spawns the watcher task for one entry.
pub fn spawn_watcher(
    params: WatchParams,
    tx: mpsc::UnboundedSender<MonitorEvent>,
    token: CancellationToken,
) {
    tokio::spawn(async move {
        let mut patterns: Vec<String> =
            BUILTIN_IGNORES.iter().map(|s| s.to_string()).collect();
        patterns.extend(params.ignore.iter().cloned());

        let mut prev = scan(&params.root, &patterns, &params.data_dir).await;
        let mut pending: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(params.poll) => {}
            }

            let cur = scan(&params.root, &patterns, &params.data_dir).await;
            if cur != prev {
                trace!(id = %params.id, "change detected under watched tree");
                pending = Some(Instant::now());
                prev = cur;
            }

            if let Some(since) = pending {
                if since.elapsed() >= params.debounce {
                    pending = None;
                    if tx
                        .send(MonitorEvent::FileChange {
                            id: params.id.clone(),
                        })
                        .is_err()
                    {
                        return;
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patterns_match_components_and_wildcards() {
        assert!(pattern_matches("node_modules", "node_modules"));
        assert!(pattern_matches("debug.log", "*.log"));
        assert!(pattern_matches("tmp-build", "tmp-*"));
        assert!(!pattern_matches("src", "node_modules"));
        assert!(!pattern_matches("logfile", "*.log"));
    }

    #[test]
    fn ignored_paths_cover_builtins_and_data_dir() {
        let patterns: Vec<String> = BUILTIN_IGNORES.iter().map(|s| s.to_string()).collect();
        let data = Path::new("/home/u/.procvisor");

        assert!(is_ignored(
            Path::new("/app/node_modules/x/index.js"),
            &patterns,
            data
        ));
        assert!(is_ignored(Path::new("/app/out/debug.log"), &patterns, data));
        assert!(is_ignored(
            Path::new("/home/u/.procvisor/logs/x/app.log"),
            &patterns,
            data
        ));
        assert!(!is_ignored(Path::new("/app/src/index.js"), &patterns, data));
    }

    #[tokio::test]
    async fn burst_of_changes_collapses_to_one_event() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("app.js");
        tokio::fs::write(&script, "v0").await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        spawn_watcher(
            WatchParams {
                id: "abc".to_string(),
                root: dir.path().to_path_buf(),
                ignore: Vec::new(),
                data_dir: PathBuf::from("/nonexistent-data-dir"),
                poll: Duration::from_millis(20),
                debounce: Duration::from_millis(80),
            },
            tx,
            token.clone(),
        );

        // Let the watcher take its baseline scan.
        tokio::time::sleep(Duration::from_millis(60)).await;

        // A burst of rapid writes within the debounce window.
        for i in 0..10usize {
            // Vary the length so the fingerprint changes even on coarse
            // mtime filesystems.
            tokio::fs::write(&script, "x".repeat(i + 1)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // Exactly one event after the tree goes quiet.
        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("watcher should report the burst")
            .unwrap();
        assert!(matches!(first, MonitorEvent::FileChange { ref id } if id == "abc"));

        let extra = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(extra.is_err(), "burst must collapse to a single event");
        token.cancel();
    }

    #[tokio::test]
    async fn quiet_tree_reports_nothing() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("app.js"), "v0").await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        spawn_watcher(
            WatchParams {
                id: "abc".to_string(),
                root: dir.path().to_path_buf(),
                ignore: Vec::new(),
                data_dir: PathBuf::from("/nonexistent-data-dir"),
                poll: Duration::from_millis(20),
                debounce: Duration::from_millis(50),
            },
            tx,
            token.clone(),
        );

        let got = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(got.is_err(), "no changes, no events");
        token.cancel();
    }
}
