//! # Control protocol: newline-framed JSON requests and replies.
//!
//! A client opens the local stream, sends `{action, target?, options?}`
//! terminated by `\n`, and receives `{success, message, data?}` the same
//! way. Multiple requests may be pipelined on one stream; framing is
//! strictly by newline, replies come back in request order.
//!
//! `target` may be an entry id, a name, or the literal `all`; lookup
//! tries id first, then name. Unknown actions answer
//! `{success:false, message:"Unknown command: <action>"}`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::manifest::parse_memory_size;
use crate::registry::{EntrySpec, LogFormat, LogOutput};

/// Target value addressing every entry at once.
pub const TARGET_ALL: &str = "all";

/// Supported actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Liveness check.
    Ping,
    /// Create (or revive) an entry and spawn its child.
    Start,
    /// Stop the child and remove the entry.
    Stop,
    /// Stop and respawn with the same spec.
    Restart,
    /// Entry listing or a single entry view.
    Status,
    /// Tail of an entry's captured output.
    Logs,
    /// Force an immediate snapshot write.
    Save,
    /// Remove an entry in any state.
    Delete,
    /// Install the init-system unit.
    Startup,
    /// Unload and remove the init-system unit.
    Unstartup,
}

impl Action {
    /// Parses a wire action string.
    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "ping" => Action::Ping,
            "start" => Action::Start,
            "stop" => Action::Stop,
            "restart" => Action::Restart,
            "status" => Action::Status,
            "logs" => Action::Logs,
            "save" => Action::Save,
            "delete" => Action::Delete,
            "startup" => Action::Startup,
            "unstartup" => Action::Unstartup,
            _ => return None,
        })
    }
}

/// Option bag accepted alongside a request.
///
/// Everything is optional; actions read the fields they understand
/// (`start` reads the spec-shaped ones, `logs` reads `lines`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    /// Entry name for `start` (defaults to the script's file stem).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Extra arguments after the script path.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Working directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Environment overlay as `KEY=VALUE` strings.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    /// Interpreter override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,
    /// Restart on file changes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch: Option<bool>,
    /// Extra watch ignore patterns.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub watch_ignore: Vec<String>,
    /// Memory budget as a size string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<String>,
    /// CPU budget in percent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<f64>,
    /// Initial restart delay in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_delay: Option<u64>,
    /// Max consecutive failed starts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_restarts: Option<u32>,
    /// Readiness URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check: Option<String>,
    /// Output framing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_format: Option<LogFormat>,
    /// Output destination.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_output: Option<LogOutput>,
    /// Advertised metrics port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_port: Option<u16>,
    /// Line count for `logs`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<usize>,
}

impl RequestOptions {
    /// Builds an [`EntrySpec`] for `start` from the option bag.
    pub fn into_spec(self, script: PathBuf) -> Result<EntrySpec> {
        let name = match self.name {
            Some(name) if !name.trim().is_empty() => name,
            _ => script
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "app".to_string()),
        };

        let mut env = BTreeMap::new();
        for pair in &self.env {
            let (key, value) = pair.split_once('=').ok_or_else(|| Error::InvalidConfig {
                reason: format!("env entry '{pair}' is not KEY=VALUE"),
            })?;
            env.insert(key.to_string(), value.to_string());
        }

        let memory_limit = self
            .memory_limit
            .as_deref()
            .map(parse_memory_size)
            .transpose()?;

        if let Some(cpu) = self.cpu_limit {
            if !(0.0..=100.0).contains(&cpu) {
                return Err(Error::InvalidConfig {
                    reason: format!("cpu_limit must be within 0-100, got {cpu}"),
                });
            }
        }

        let mut spec = EntrySpec::new(name, script);
        spec.args = self.args;
        spec.cwd = self.cwd;
        spec.env = env;
        spec.interpreter = self.interpreter;
        spec.watch = self.watch.unwrap_or(false);
        spec.watch_ignore = self.watch_ignore;
        spec.memory_limit = memory_limit;
        spec.cpu_limit = self.cpu_limit;
        spec.restart_delay = self.restart_delay;
        spec.max_restarts = self.max_restarts;
        spec.health_check = self.health_check;
        spec.log_format = self.log_format.unwrap_or_default();
        spec.log_output = self.log_output.unwrap_or_default();
        spec.metrics_port = self.metrics_port;
        Ok(spec)
    }
}

/// One framed request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Wire action name.
    pub action: String,
    /// Entry id, name, or `all`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Action-specific options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<RequestOptions>,
}

impl Request {
    /// Builds a request with just an action.
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            target: None,
            options: None,
        }
    }

    /// Attaches a target.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Attaches options.
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = Some(options);
        self
    }
}

/// One framed reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// True when the command's effects were committed.
    pub success: bool,
    /// One-line human summary.
    pub message: String,
    /// Action-specific payload (entry views, log lines, stats).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Reply {
    /// Successful reply without payload.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }

    /// Successful reply with payload.
    pub fn ok_with(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Failed reply.
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }

    /// Failed reply from a typed error.
    pub fn from_error(err: &Error) -> Self {
        Self::fail(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_documented_start_request() {
        let raw = r#"{"action":"start","target":"app.js","options":{"name":"api","watch":true,"env":["PORT=3000"]}}"#;
        let req: Request = serde_json::from_str(raw).unwrap();
        assert_eq!(req.action, "start");
        assert_eq!(req.target.as_deref(), Some("app.js"));

        let spec = req
            .options
            .unwrap()
            .into_spec(PathBuf::from("app.js"))
            .unwrap();
        assert_eq!(spec.name, "api");
        assert!(spec.watch);
        assert_eq!(spec.env.get("PORT").map(String::as_str), Some("3000"));
    }

    #[test]
    fn name_defaults_to_the_script_stem() {
        let spec = RequestOptions::default()
            .into_spec(PathBuf::from("/srv/app/server.js"))
            .unwrap();
        assert_eq!(spec.name, "server");
    }

    #[test]
    fn malformed_env_pairs_are_rejected() {
        let options = RequestOptions {
            env: vec!["PORT3000".to_string()],
            ..Default::default()
        };
        assert!(options.into_spec(PathBuf::from("app.js")).is_err());
    }

    #[test]
    fn unknown_actions_do_not_parse() {
        assert_eq!(Action::parse("status"), Some(Action::Status));
        assert_eq!(Action::parse("reload"), None);
    }

    #[test]
    fn reply_omits_null_data_on_the_wire() {
        let raw = serde_json::to_string(&Reply::ok("pong")).unwrap();
        assert_eq!(raw, r#"{"success":true,"message":"pong"}"#);
    }
}
