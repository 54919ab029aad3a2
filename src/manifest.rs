//! # YAML manifest: declarative app configuration.
//!
//! A manifest is a YAML document with a top-level `apps:` list. Keys are
//! snake_case in the file and map onto the camelCase entry model
//! internally. The CLI expands a manifest into one start command per
//! declared instance; the engine itself never reads manifests.
//!
//! ## Validation
//! - `name` (required, unique) and `script` (required)
//! - `memory_limit` follows `^\d+(\.\d+)?\s*(b|kb|mb|gb)$` (case-insensitive)
//! - `cpu_limit` within 0–100
//! - `instances` ≥ 1 or the literal `auto`
//! - `metrics_port` within 1–65535
//! - `health_check` a valid http/https URL

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};
use crate::registry::{EntrySpec, LogFormat, LogOutput};

/// Top-level manifest document.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Declared applications.
    pub apps: Vec<AppManifest>,
}

/// Instance count: a number or the literal `auto`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Instances {
    /// Fixed count.
    Count(u32),
    /// Keyword form; only `auto` is accepted.
    Keyword(String),
}

/// One application declaration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppManifest {
    /// Unique human label.
    pub name: String,
    /// Script path the interpreter runs.
    pub script: PathBuf,
    /// Extra arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    /// Environment overlay.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Interpreter override.
    #[serde(default)]
    pub interpreter: Option<String>,
    /// Fork-mode duplication count (≥ 1 or `auto`).
    #[serde(default)]
    pub instances: Option<Instances>,
    /// Restart on file changes.
    #[serde(default)]
    pub watch: bool,
    /// Extra watch ignore patterns.
    #[serde(default)]
    pub watch_ignore: Vec<String>,
    /// Memory budget as a size string (`64mb`, `1.5gb`, …).
    #[serde(default)]
    pub memory_limit: Option<String>,
    /// CPU budget in percent.
    #[serde(default)]
    pub cpu_limit: Option<f64>,
    /// Initial restart delay in milliseconds.
    #[serde(default)]
    pub restart_delay: Option<u64>,
    /// Max consecutive failed starts.
    #[serde(default)]
    pub max_restarts: Option<u32>,
    /// Readiness URL.
    #[serde(default)]
    pub health_check: Option<String>,
    /// Output framing.
    #[serde(default)]
    pub log_format: Option<LogFormat>,
    /// Output destination.
    #[serde(default)]
    pub log_output: Option<LogOutput>,
    /// Advertised metrics port.
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

/// Parses a size string per the manifest grammar into bytes.
///
/// Accepted: an integer or decimal number, optional whitespace, and a
/// unit of `b`, `kb`, `mb` or `gb` (any case).
pub fn parse_memory_size(raw: &str) -> Result<u64> {
    let s = raw.trim();
    let unit_at = s
        .find(|c: char| c.is_ascii_alphabetic())
        .ok_or_else(|| invalid_size(raw))?;
    let (number, unit) = s.split_at(unit_at);
    let number = number.trim_end();

    if number.is_empty()
        || !number
            .chars()
            .all(|c| c.is_ascii_digit() || c == '.')
        || number.matches('.').count() > 1
        || number.starts_with('.')
        || number.ends_with('.')
    {
        return Err(invalid_size(raw));
    }

    let multiplier: u64 = match unit.to_ascii_lowercase().as_str() {
        "b" => 1,
        "kb" => 1024,
        "mb" => 1024 * 1024,
        "gb" => 1024 * 1024 * 1024,
        _ => return Err(invalid_size(raw)),
    };

    let value: f64 = number.parse().map_err(|_| invalid_size(raw))?;
    Ok((value * multiplier as f64) as u64)
}

fn invalid_size(raw: &str) -> Error {
    Error::InvalidConfig {
        reason: format!("invalid memory limit '{raw}' (expected e.g. '512mb', '1.5gb')"),
    }
}

impl AppManifest {
    /// Validates one app declaration.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(invalid("app name must not be empty"));
        }
        if self.script.as_os_str().is_empty() {
            return Err(invalid(format!("app '{}' has no script", self.name)));
        }
        if let Some(cpu) = self.cpu_limit {
            if !(0.0..=100.0).contains(&cpu) {
                return Err(invalid(format!(
                    "app '{}': cpu_limit must be within 0-100, got {cpu}",
                    self.name
                )));
            }
        }
        if let Some(Instances::Count(n)) = &self.instances {
            if *n < 1 {
                return Err(invalid(format!(
                    "app '{}': instances must be at least 1",
                    self.name
                )));
            }
        }
        if let Some(Instances::Keyword(word)) = &self.instances {
            if word != "auto" {
                return Err(invalid(format!(
                    "app '{}': instances must be a number or 'auto', got '{word}'",
                    self.name
                )));
            }
        }
        if let Some(port) = self.metrics_port {
            if port == 0 {
                return Err(invalid(format!(
                    "app '{}': metrics_port must be within 1-65535",
                    self.name
                )));
            }
        }
        if let Some(limit) = &self.memory_limit {
            parse_memory_size(limit)?;
        }
        if let Some(url) = &self.health_check {
            let parsed = Url::parse(url)
                .map_err(|e| invalid(format!("app '{}': bad health_check URL: {e}", self.name)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(invalid(format!(
                    "app '{}': health_check must be http or https",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Resolved instance count (`auto` = available parallelism).
    fn instance_count(&self) -> u32 {
        match &self.instances {
            None => 1,
            Some(Instances::Count(n)) => (*n).max(1),
            Some(Instances::Keyword(_)) => std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1),
        }
    }

    /// Converts the declaration into one spec per instance. Multi-instance
    /// apps get `-1…-N` name suffixes (plain fork-mode duplication).
    fn expand(&self) -> Result<Vec<EntrySpec>> {
        self.validate()?;

        let memory_limit = self
            .memory_limit
            .as_deref()
            .map(parse_memory_size)
            .transpose()?;

        let count = self.instance_count();
        let mut specs = Vec::with_capacity(count as usize);
        for i in 1..=count {
            let name = if count == 1 {
                self.name.clone()
            } else {
                format!("{}-{i}", self.name)
            };
            let mut spec = EntrySpec::new(name, self.script.clone());
            spec.args = self.args.clone();
            spec.cwd = self.cwd.clone();
            spec.env = self.env.clone();
            spec.interpreter = self.interpreter.clone();
            spec.watch = self.watch;
            spec.watch_ignore = self.watch_ignore.clone();
            spec.memory_limit = memory_limit;
            spec.cpu_limit = self.cpu_limit;
            spec.restart_delay = self.restart_delay;
            spec.max_restarts = self.max_restarts;
            spec.health_check = self.health_check.clone();
            spec.log_format = self.log_format.unwrap_or_default();
            spec.log_output = self.log_output.unwrap_or_default();
            spec.metrics_port = self.metrics_port;
            specs.push(spec);
        }
        Ok(specs)
    }
}

impl Manifest {
    /// Parses and validates a manifest document.
    pub fn from_str(raw: &str) -> Result<Self> {
        let manifest: Manifest = serde_yaml::from_str(raw).map_err(|e| Error::InvalidConfig {
            reason: format!("manifest parse error: {e}"),
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Reads a manifest file from disk.
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        Self::from_str(&raw)
    }

    /// Validates every app and checks name uniqueness.
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for app in &self.apps {
            app.validate()?;
            if !seen.insert(app.name.as_str()) {
                return Err(invalid(format!("duplicate app name '{}'", app.name)));
            }
        }
        Ok(())
    }

    /// Expands every app into entry specs, instances included.
    pub fn expand(&self) -> Result<Vec<EntrySpec>> {
        let mut specs = Vec::new();
        for app in &self.apps {
            specs.extend(app.expand()?);
        }
        Ok(specs)
    }
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::InvalidConfig {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_document() {
        let raw = r#"
apps:
  - name: api
    script: server.js
    args: ["--port", "3000"]
    env:
      PORT: "3000"
    watch: true
    watch_ignore: ["dist"]
    memory_limit: 64mb
    cpu_limit: 80
    restart_delay: 500
    max_restarts: 5
    health_check: http://localhost:3000/health
    log_format: json
    log_output: stdout
    metrics_port: 9100
  - name: worker
    script: worker.js
    instances: 2
"#;
        let manifest = Manifest::from_str(raw).unwrap();
        let specs = manifest.expand().unwrap();
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0].name, "api");
        assert_eq!(specs[0].memory_limit, Some(64 * 1024 * 1024));
        assert_eq!(specs[0].log_format, LogFormat::Json);
        assert_eq!(specs[0].log_output, LogOutput::Stdout);
        assert_eq!(specs[1].name, "worker-1");
        assert_eq!(specs[2].name, "worker-2");
    }

    #[test]
    fn memory_sizes_follow_the_grammar() {
        assert_eq!(parse_memory_size("64mb").unwrap(), 64 * 1024 * 1024);
        assert_eq!(parse_memory_size("512 KB").unwrap(), 512 * 1024);
        assert_eq!(
            parse_memory_size("1.5gb").unwrap(),
            (1.5 * 1024.0 * 1024.0 * 1024.0) as u64
        );
        assert_eq!(parse_memory_size("128B").unwrap(), 128);

        for bad in ["64m", "mb", "12", "1..5gb", ".5gb", "5.gb", "64 m b"] {
            assert!(parse_memory_size(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let raw = "apps:\n  - name: api\n    script: a.js\n  - name: api\n    script: b.js\n";
        assert!(Manifest::from_str(raw).is_err());
    }

    #[test]
    fn cpu_limit_outside_range_is_rejected() {
        let raw = "apps:\n  - name: api\n    script: a.js\n    cpu_limit: 150\n";
        assert!(Manifest::from_str(raw).is_err());
    }

    #[test]
    fn instances_accept_auto_only() {
        let ok = "apps:\n  - name: api\n    script: a.js\n    instances: auto\n";
        assert!(Manifest::from_str(ok).is_ok());
        let bad = "apps:\n  - name: api\n    script: a.js\n    instances: most\n";
        assert!(Manifest::from_str(bad).is_err());
    }

    #[test]
    fn zero_metrics_port_is_rejected() {
        let raw = "apps:\n  - name: api\n    script: a.js\n    metrics_port: 0\n";
        assert!(Manifest::from_str(raw).is_err());
    }
}
