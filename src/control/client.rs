//! # Thin control-plane client.
//!
//! Connects to the daemon's socket, writes one newline-framed request,
//! reads one framed reply. The client enforces the 10 s per-request
//! ceiling; the server never times a request out on its own.
//!
//! Exit-code mapping for front ends: `0` success, `1` server-returned
//! failure, `2` transport failure.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::timeout;

use crate::config::DaemonConfig;
use crate::error::{Error, Result};

use super::protocol::{Reply, Request};

/// Client for one daemon endpoint.
pub struct Client {
    socket_path: PathBuf,
    ceiling: Duration,
}

impl Client {
    /// Builds a client against the configured socket.
    pub fn new(cfg: &DaemonConfig) -> Self {
        Self {
            socket_path: cfg.socket_path.clone(),
            ceiling: cfg.request_ceiling,
        }
    }

    /// Sends one request and awaits its reply, bounded by the ceiling.
    pub async fn request(&self, req: &Request) -> Result<Reply> {
        match timeout(self.ceiling, self.round_trip(req)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                what: format!("request '{}'", req.action),
                after: self.ceiling,
            }),
        }
    }

    async fn round_trip(&self, req: &Request) -> Result<Reply> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (reader, mut writer) = stream.into_split();

        let mut framed = serde_json::to_string(req).map_err(|e| Error::Protocol {
            reason: format!("request serialization failed: {e}"),
        })?;
        framed.push('\n');
        writer.write_all(framed.as_bytes()).await?;
        writer.flush().await?;

        let mut lines = BufReader::new(reader).lines();
        let line = lines.next_line().await?.ok_or_else(|| Error::Protocol {
            reason: "connection closed before a reply arrived".to_string(),
        })?;
        serde_json::from_str(&line).map_err(|e| Error::Protocol {
            reason: format!("malformed reply: {e}"),
        })
    }
}

/// Maps a request outcome onto the CLI exit code contract.
pub fn exit_code(outcome: &Result<Reply>) -> i32 {
    match outcome {
        Ok(reply) if reply.success => 0,
        Ok(_) => 1,
        Err(_) => 2,
    }
}
