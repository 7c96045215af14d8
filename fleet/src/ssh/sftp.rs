// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result, anyhow};
use russh::client::Handle;
use russh_sftp::client::SftpSession;
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::protocol::{FileAttributes, StatusCode};

use super::exec::capture_on;
use super::utils::build_remote_dir_paths;
use super::{ClientHandler, Transport};

/// Prints the sftp server configured in sshd, one path per matching line.
const SFTP_SERVER_LOOKUP: &str =
    r"sudo -n sed -n 's/^[[:space:]]*Subsystem[[:space:]]\{1,\}sftp[[:space:]]\{1,\}//p' /etc/ssh/sshd_config";

pub(super) async fn open_subsystem(handle: &Handle<ClientHandler>) -> Result<SftpSession> {
    let channel = handle
        .channel_open_session()
        .await
        .context("opening sftp channel")?;
    channel
        .request_subsystem(true, "sftp")
        .await
        .context("requesting sftp subsystem")?;
    SftpSession::new(channel.into_stream())
        .await
        .context("starting sftp session")
}

/// Starts the host's sftp server binary under `sudo` on an exec channel.
pub(super) async fn open_with_sudo(handle: &Handle<ClientHandler>) -> Result<SftpSession> {
    let lookup = capture_on(handle, SFTP_SERVER_LOOKUP).await?;
    if !lookup.success() {
        return Err(anyhow!(
            "looking up sftp server failed: {}",
            lookup.stderr_lossy().trim()
        ));
    }
    let command = sudo_sftp_command(&String::from_utf8_lossy(&lookup.stdout))?;
    log::debug!("starting sftp server with '{command}'");
    let channel = handle
        .channel_open_session()
        .await
        .context("opening sftp channel")?;
    channel
        .exec(true, command.as_str())
        .await
        .context("exec request for sftp server")?;
    SftpSession::new(channel.into_stream())
        .await
        .context("starting sudo sftp session")
}

/// Builds the command that runs the configured sftp server as root.
fn sudo_sftp_command(sshd_subsystem: &str) -> Result<String> {
    let server = sshd_subsystem
        .lines()
        .map(|line| line.trim().trim_end_matches('\r'))
        .find(|line| !line.is_empty())
        .ok_or_else(|| anyhow!("sshd_config declares no sftp subsystem"))?;
    if server == "internal-sftp" {
        return Err(anyhow!("sshd uses internal-sftp, which cannot run under sudo"));
    }
    if server.starts_with("sudo ") {
        Ok(server.to_string())
    } else {
        Ok(format!("sudo -n {server}"))
    }
}

impl Transport {
    pub(crate) async fn path_exists(&self, path: &str) -> Result<bool> {
        self.sftp
            .try_exists(path)
            .await
            .with_context(|| format!("stat {path}"))
    }

    pub(crate) async fn dir_exists(&self, path: &str) -> Result<bool> {
        match self.sftp.metadata(path).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(SftpError::Status(status)) if matches!(status.status_code, StatusCode::NoSuchFile) => {
                Ok(false)
            }
            Err(err) => Err(err).with_context(|| format!("stat {path}")),
        }
    }

    /// Creates every missing component of `remote_dir`. Only directories created here
    /// receive `mode`; existing ones are left untouched.
    pub(crate) async fn ensure_remote_dir(&self, remote_dir: &str, mode: u32) -> Result<()> {
        for cur in build_remote_dir_paths(remote_dir) {
            match self.sftp.metadata(&cur).await {
                Ok(meta) => {
                    if !meta.is_dir() {
                        return Err(anyhow!(
                            "remote path exists but is not a directory: {}",
                            cur
                        ));
                    }
                }
                Err(e) => {
                    log::debug!("creating remote dir {cur} after stat error: {e}");
                    self.sftp
                        .create_dir(&cur)
                        .await
                        .with_context(|| format!("creating path {cur}"))?;
                    let attrs = FileAttributes {
                        permissions: Some(mode),
                        ..Default::default()
                    };
                    if let Err(e) = self.sftp.set_metadata(&cur, attrs).await {
                        log::warn!("error when setting mode of {}: {}", &cur, e);
                    }
                }
            }
        }
        Ok(())
    }
}
