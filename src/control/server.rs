//! # ControlPlane: the local command listener.
//!
//! Listens on the daemon's Unix socket. Each connection is served by its
//! own task: newline-framed JSON requests are parsed, dispatched onto
//! the supervisor queue one at a time, and answered in order — a client
//! may pipeline requests on one stream and never sees replies reordered.
//!
//! A malformed frame answers `{success:false}` with a protocol message;
//! the stream stays usable. There is no server-side request timeout:
//! commands complete or the connection drops.

use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::supervise::SupervisorHandle;

use super::protocol::{Reply, Request};

/// Accept loop for the control socket. Resolves once `token` fires; the
/// socket file is removed on the way out.
pub async fn serve(
    socket_path: PathBuf,
    supervisor: SupervisorHandle,
    token: CancellationToken,
) -> Result<()> {
    // A stale socket from a crashed daemon would block the bind.
    if tokio::fs::try_exists(&socket_path).await.unwrap_or(false) {
        tokio::fs::remove_file(&socket_path).await?;
    }
    let listener = UnixListener::bind(&socket_path).map_err(Error::Io)?;
    info!(socket = %socket_path.display(), "control plane listening");

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let supervisor = supervisor.clone();
                    let conn_token = token.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, supervisor, conn_token).await {
                            debug!(error = %e, "control connection closed with error");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                }
            },
        }
    }

    let _ = tokio::fs::remove_file(&socket_path).await;
    info!("control plane stopped");
    Ok(())
}

/// Serves one client stream: read a line, dispatch, write a line.
async fn handle_connection(
    stream: UnixStream,
    supervisor: SupervisorHandle,
    token: CancellationToken,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = tokio::select! {
            _ = token.cancelled() => break,
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
        };
        if line.trim().is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<Request>(&line) {
            Ok(req) => supervisor.dispatch(req).await,
            Err(e) => Reply::from_error(&Error::Protocol {
                reason: format!("malformed frame: {e}"),
            }),
        };

        let mut framed = serde_json::to_string(&reply).unwrap_or_else(|_| {
            r#"{"success":false,"message":"reply serialization failed"}"#.to_string()
        });
        framed.push('\n');
        writer.write_all(framed.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}
