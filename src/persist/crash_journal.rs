//! # Crash journal: append-only per-entry crash records with stats.
//!
//! Every non-zero exit or exit-by-signal appends a [`CrashRecord`] to
//! `<data>/crashes/<id>.json` — a JSON array maintained read-modify-write
//! and trimmed to the newest 100 records.
//!
//! Aggregates ([`CrashStats`]) serve the status/diagnostics paths: total
//! count, count within the last minute, modal exit code, mean uptime.
//!
//! Journal I/O is non-fatal by contract: callers log failures and move on.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// One crash, as observed at child exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashRecord {
    /// When the exit was observed.
    pub timestamp: DateTime<Utc>,
    /// Entry id.
    pub id: String,
    /// Entry name at crash time.
    pub name: String,
    /// Exit code, absent for signal deaths.
    pub exit_code: Option<i32>,
    /// Terminating signal number, if any.
    pub signal: Option<i32>,
    /// Last sampled CPU percentage before the exit.
    pub cpu_percent: f64,
    /// Last sampled resident set size before the exit.
    pub rss_bytes: u64,
    /// How long the child had been up, in milliseconds.
    pub uptime_ms: u64,
    /// Entry restart count at crash time.
    pub restart_count: u32,
}

/// Aggregate view over one entry's journal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashStats {
    /// Records currently retained.
    pub total: usize,
    /// Crashes within the last 60 seconds.
    pub last_minute: usize,
    /// Most frequent exit code, if any record carries one.
    pub modal_exit_code: Option<i32>,
    /// Mean uptime across retained records, in milliseconds.
    pub mean_uptime_ms: u64,
}

/// Append-only journal of crash records, one JSON file per entry.
#[derive(Debug, Clone)]
pub struct CrashJournal {
    dir: PathBuf,
    cap: usize,
}

impl CrashJournal {
    /// Creates a journal rooted at `dir`, retaining `cap` newest records
    /// per entry.
    pub fn new(dir: PathBuf, cap: usize) -> Self {
        Self { dir, cap }
    }

    fn file(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Appends a record, trimming the file to the newest `cap`.
    pub async fn append(&self, record: CrashRecord) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut records = self.read(&record.id).await;
        records.push(record);
        if records.len() > self.cap {
            let excess = records.len() - self.cap;
            records.drain(..excess);
        }
        let raw = serde_json::to_vec_pretty(&records)?;
        tokio::fs::write(self.file(&records[0].id), raw).await
    }

    /// Reads all retained records, oldest first. Missing or unreadable
    /// files read as empty.
    pub async fn read(&self, id: &str) -> Vec<CrashRecord> {
        match tokio::fs::read(self.file(id)).await {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    /// Newest `n` records in chronological order.
    pub async fn tail(&self, id: &str, n: usize) -> Vec<CrashRecord> {
        let records = self.read(id).await;
        let skip = records.len().saturating_sub(n);
        records.into_iter().skip(skip).collect()
    }

    /// Aggregate statistics over the retained records.
    pub async fn stats(&self, id: &str) -> CrashStats {
        let records = self.read(id).await;
        let now = Utc::now();

        let last_minute = records
            .iter()
            .filter(|r| now - r.timestamp <= ChronoDuration::seconds(60))
            .count();

        let mut counts: HashMap<i32, usize> = HashMap::new();
        for code in records.iter().filter_map(|r| r.exit_code) {
            *counts.entry(code).or_default() += 1;
        }
        // Deterministic tie-break: highest count, then smallest code.
        let modal_exit_code = counts
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
            .map(|(code, _)| code);

        let mean_uptime_ms = if records.is_empty() {
            0
        } else {
            records.iter().map(|r| u128::from(r.uptime_ms)).sum::<u128>() as u64
                / records.len() as u64
        };

        CrashStats {
            total: records.len(),
            last_minute,
            modal_exit_code,
            mean_uptime_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, code: Option<i32>, uptime_ms: u64, age_secs: i64) -> CrashRecord {
        CrashRecord {
            timestamp: Utc::now() - ChronoDuration::seconds(age_secs),
            id: id.to_string(),
            name: "api".to_string(),
            exit_code: code,
            signal: if code.is_none() { Some(9) } else { None },
            cpu_percent: 0.0,
            rss_bytes: 0,
            uptime_ms,
            restart_count: 0,
        }
    }

    #[tokio::test]
    async fn append_trims_to_the_cap() {
        let dir = tempfile::tempdir().unwrap();
        let journal = CrashJournal::new(dir.path().to_path_buf(), 5);

        for i in 0..8 {
            journal
                .append(record("abc", Some(i), 100, 0))
                .await
                .unwrap();
        }

        let records = journal.read("abc").await;
        assert_eq!(records.len(), 5);
        // Newest are kept: codes 3..=7 survive.
        assert_eq!(records[0].exit_code, Some(3));
        assert_eq!(records[4].exit_code, Some(7));
    }

    #[tokio::test]
    async fn stats_report_modal_code_and_mean_uptime() {
        let dir = tempfile::tempdir().unwrap();
        let journal = CrashJournal::new(dir.path().to_path_buf(), 100);

        journal.append(record("abc", Some(1), 100, 300)).await.unwrap();
        journal.append(record("abc", Some(1), 200, 200)).await.unwrap();
        journal.append(record("abc", Some(2), 300, 30)).await.unwrap();
        journal.append(record("abc", None, 400, 10)).await.unwrap();

        let stats = journal.stats("abc").await;
        assert_eq!(stats.total, 4);
        assert_eq!(stats.last_minute, 2);
        assert_eq!(stats.modal_exit_code, Some(1));
        assert_eq!(stats.mean_uptime_ms, 250);
    }

    #[tokio::test]
    async fn tail_returns_newest_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let journal = CrashJournal::new(dir.path().to_path_buf(), 100);

        for i in 0..4 {
            journal
                .append(record("abc", Some(i), 100, 0))
                .await
                .unwrap();
        }

        let tail = journal.tail("abc", 2).await;
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].exit_code, Some(2));
        assert_eq!(tail[1].exit_code, Some(3));
    }

    #[tokio::test]
    async fn missing_journal_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let journal = CrashJournal::new(dir.path().to_path_buf(), 100);
        assert!(journal.read("nope").await.is_empty());
        assert_eq!(journal.stats("nope").await.total, 0);
    }
}
