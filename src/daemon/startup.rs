//! # Init-system integration: boot-time daemon launch.
//!
//! `startup` writes a user-level unit that launches the daemon at login
//! with unconditional restart; `unstartup` unloads and removes it.
//!
//! - macOS: a LaunchAgent plist under `~/Library/LaunchAgents/` with
//!   `RunAtLoad`
//! - Linux (and other unix): a user systemd unit under
//!   `~/.config/systemd/user/` with `WantedBy=default.target` and
//!   `Restart=always`
//!
//! Invoking `launchctl`/`systemctl` is best effort: tool absence is
//! logged and swallowed, the unit file on disk is the contract.

use std::path::PathBuf;

use tokio::process::Command;
use tracing::{info, warn};

use crate::config::{DaemonConfig, PRODUCT};
use crate::error::{Error, Result};

fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or_else(|| Error::InvalidConfig {
        reason: "cannot determine the home directory".to_string(),
    })
}

/// Path of the unit file for this platform.
pub fn unit_path() -> Result<PathBuf> {
    let home = home_dir()?;
    if cfg!(target_os = "macos") {
        Ok(home
            .join("Library/LaunchAgents")
            .join(format!("{PRODUCT}.plist")))
    } else {
        Ok(home
            .join(".config/systemd/user")
            .join(format!("{PRODUCT}.service")))
    }
}

fn launchd_plist(exe: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>{PRODUCT}</string>
    <key>ProgramArguments</key>
    <array>
        <string>{exe}</string>
        <string>daemon</string>
    </array>
    <key>RunAtLoad</key>
    <true/>
    <key>KeepAlive</key>
    <true/>
</dict>
</plist>
"#
    )
}

fn systemd_unit(exe: &str) -> String {
    format!(
        "[Unit]\n\
         Description={PRODUCT} process supervisor daemon\n\
         \n\
         [Service]\n\
         ExecStart={exe} daemon\n\
         Restart=always\n\
         RestartSec=2\n\
         \n\
         [Install]\n\
         WantedBy=default.target\n"
    )
}

/// Runs an init-system tool, logging and swallowing failures.
async fn best_effort(tool: &str, args: &[&str]) {
    match Command::new(tool).args(args).output().await {
        Ok(out) if out.status.success() => {}
        Ok(out) => warn!(
            tool,
            ?args,
            stderr = %String::from_utf8_lossy(&out.stderr).trim(),
            "init-system tool reported failure"
        ),
        Err(e) => warn!(tool, error = %e, "init-system tool unavailable"),
    }
}

/// Writes and loads the boot-time unit; returns its path.
pub async fn install(_cfg: &DaemonConfig) -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let exe = exe.display().to_string();
    let path = unit_path()?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let unit = if cfg!(target_os = "macos") {
        launchd_plist(&exe)
    } else {
        systemd_unit(&exe)
    };
    tokio::fs::write(&path, unit).await?;
    info!(path = %path.display(), "startup unit written");

    if cfg!(target_os = "macos") {
        best_effort("launchctl", &["load", &path.display().to_string()]).await;
    } else {
        best_effort("systemctl", &["--user", "daemon-reload"]).await;
        best_effort("systemctl", &["--user", "enable", PRODUCT]).await;
    }
    Ok(path)
}

/// Unloads and removes the boot-time unit; returns its former path.
pub async fn uninstall() -> Result<PathBuf> {
    let path = unit_path()?;

    if cfg!(target_os = "macos") {
        best_effort("launchctl", &["unload", &path.display().to_string()]).await;
    } else {
        best_effort("systemctl", &["--user", "disable", PRODUCT]).await;
    }

    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::NotFound {
            target: path.display().to_string(),
        }),
        Err(e) => Err(Error::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn systemd_unit_carries_the_install_contract() {
        let unit = systemd_unit("/usr/local/bin/procvisor");
        assert!(unit.contains("ExecStart=/usr/local/bin/procvisor daemon"));
        assert!(unit.contains("Restart=always"));
        assert!(unit.contains("WantedBy=default.target"));
    }

    #[test]
    fn plist_runs_at_load() {
        let plist = launchd_plist("/usr/local/bin/procvisor");
        assert!(plist.contains("<key>RunAtLoad</key>"));
        assert!(plist.contains("<string>daemon</string>"));
    }
}
