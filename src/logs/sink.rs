//! # LogSink: per-entry output capture with size-based rotation.
//!
//! Each chunk read from a child's stdout/stderr is framed and appended to
//! `<data>/logs/<id>/app.log` (or written to the daemon's stdout when the
//! spec says so).
//!
//! ## Framing
//! - text: `[<ISO8601>] [<LEVEL>] [<name>] <chunk>` — `INFO` for stdout,
//!   `ERROR` for stderr, `\n` appended if the chunk lacks one
//! - json: `{timestamp, level, processId, processName, message}` per line
//!
//! ## Rotation
//! After each write the size is checked. At the limit the sink closes the
//! handle, deletes the overflow file, shifts `app.log.N → app.log.(N+1)`
//! for N descending from `max_files − 1`, renames `app.log → app.log.1`,
//! and opens a fresh `app.log`. Rotation never runs concurrently: the
//! sink is driven behind a mutex by the capture tasks.

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde_json::json;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::registry::{LogFormat, LogOutput};

/// Which child stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Child stdout → level `INFO`.
    Stdout,
    /// Child stderr → level `ERROR`.
    Stderr,
}

impl StreamKind {
    fn level(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "INFO",
            StreamKind::Stderr => "ERROR",
        }
    }
}

/// Append handle for one entry's captured output.
pub struct LogSink {
    id: String,
    name: String,
    format: LogFormat,
    output: LogOutput,
    dir: PathBuf,
    max_bytes: u64,
    max_files: u32,
    file: Option<File>,
    size: u64,
}

impl LogSink {
    /// Opens (or creates) the sink for one entry.
    pub async fn open(
        dir: PathBuf,
        id: &str,
        name: &str,
        format: LogFormat,
        output: LogOutput,
        max_bytes: u64,
        max_files: u32,
    ) -> std::io::Result<Self> {
        let mut sink = Self {
            id: id.to_string(),
            name: name.to_string(),
            format,
            output,
            dir,
            max_bytes,
            max_files,
            file: None,
            size: 0,
        };
        if sink.output == LogOutput::File {
            sink.open_current().await?;
        }
        Ok(sink)
    }

    /// Frames `chunk` and appends it, rotating afterwards if the file
    /// crossed the size limit.
    pub async fn write(&mut self, kind: StreamKind, chunk: &str) -> std::io::Result<()> {
        let frame = self.frame(kind, chunk);
        match self.output {
            LogOutput::Stdout => {
                print!("{frame}");
                Ok(())
            }
            LogOutput::File => {
                let file = match self.file.as_mut() {
                    Some(f) => f,
                    None => return Ok(()),
                };
                file.write_all(frame.as_bytes()).await?;
                self.size += frame.len() as u64;
                if self.size >= self.max_bytes {
                    self.rotate().await?;
                }
                Ok(())
            }
        }
    }

    /// Flushes the current handle.
    pub async fn flush(&mut self) -> std::io::Result<()> {
        if let Some(f) = self.file.as_mut() {
            f.flush().await?;
        }
        Ok(())
    }

    /// Builds one framed line for `chunk`.
    fn frame(&self, kind: StreamKind, chunk: &str) -> String {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        match self.format {
            LogFormat::Text => {
                let newline = if chunk.ends_with('\n') { "" } else { "\n" };
                format!("[{timestamp}] [{}] [{}] {chunk}{newline}", kind.level(), self.name)
            }
            LogFormat::Json => {
                let line = json!({
                    "timestamp": timestamp,
                    "level": kind.level(),
                    "processId": self.id,
                    "processName": self.name,
                    "message": chunk.trim_end_matches('\n'),
                });
                format!("{line}\n")
            }
        }
    }

    async fn open_current(&mut self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join("app.log");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        self.size = file.metadata().await?.len();
        self.file = Some(file);
        Ok(())
    }

    /// Closes the handle, shifts history, reopens a fresh `app.log`.
    async fn rotate(&mut self) -> std::io::Result<()> {
        if let Some(mut f) = self.file.take() {
            f.flush().await?;
        }

        let overflow = self.rotated(self.max_files);
        if tokio::fs::try_exists(&overflow).await.unwrap_or(false) {
            tokio::fs::remove_file(&overflow).await?;
        }
        for n in (1..self.max_files).rev() {
            let from = self.rotated(n);
            if tokio::fs::try_exists(&from).await.unwrap_or(false) {
                tokio::fs::rename(&from, self.rotated(n + 1)).await?;
            }
        }
        tokio::fs::rename(self.dir.join("app.log"), self.rotated(1)).await?;

        self.open_current().await
    }

    fn rotated(&self, n: u32) -> PathBuf {
        self.dir.join(format!("app.log.{n}"))
    }
}

/// Returns the last `n` non-empty lines of the current `app.log` in `dir`.
pub async fn tail(dir: &Path, n: usize) -> std::io::Result<Vec<String>> {
    let raw = match tokio::fs::read_to_string(dir.join("app.log")).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let lines: Vec<String> = raw
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.to_string())
        .collect();
    let skip = lines.len().saturating_sub(n);
    Ok(lines.into_iter().skip(skip).collect())
}
