// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! SSH transport owned by a [`crate::host::Host`] and the channels derived from it.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use russh::client::Config;
use russh_sftp::client::SftpSession;

mod auth;
mod exec;
pub(crate) mod scp;
mod sftp;
pub(crate) mod utils;

pub use auth::AuthenticationFailure;
pub use exec::ExecOutput;
pub use utils::{format_mode, parse_mode};

const ROOT_USER: &str = "root";

/// Minimal russh client handler.
#[derive(Clone, Debug)]
pub(crate) struct ClientHandler {
    addr: SocketAddr,
}

impl russh::client::Handler for ClientHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        // Fleet nodes are provisioned from scratch and never carry stable known_hosts entries.
        log::debug!(
            "accepting {} host key for {}",
            server_public_key.algorithm(),
            self.addr
        );
        Ok(true)
    }
}

/// Parameters for establishing the SSH connection, with secrets already decrypted.
#[derive(Clone)]
pub(crate) struct SshParams {
    pub addr: SocketAddr,
    pub username: String,
    pub password: Option<String>,
    pub identity_path: Option<PathBuf>,
    pub key_passphrase: Option<String>,
    pub connect_timeout: Duration,
}

/// One authenticated SSH connection.
///
/// The transport is the sole owner of the russh handle. The SFTP session runs on a
/// channel of that handle and exec / SCP channels are opened from it on demand, so
/// closing the transport is the single point that invalidates all of them.
pub(crate) struct Transport {
    handle: russh::client::Handle<ClientHandler>,
    sftp: SftpSession,
}

impl Transport {
    /// Opens transport, verifies a session channel and opens SFTP. Non-root users get an
    /// SFTP server started through `sudo` when the host allows it.
    /// Nothing is kept unless every step succeeds.
    pub(crate) async fn open(params: &SshParams) -> Result<Self> {
        let config = Arc::new(Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            channel_buffer_size: 64,
            window_size: 1024 * 1024,
            ..Default::default()
        });
        let handler = ClientHandler { addr: params.addr };
        let mut handle = tokio::time::timeout(
            params.connect_timeout,
            russh::client::connect(config, params.addr, handler),
        )
        .await
        .with_context(|| format!("ssh connect timed out after {:?}", params.connect_timeout))?
        .context("ssh connect failed")?;
        log::info!(
            "established connection with {}@{}, proceeding with auth",
            &params.username,
            &params.addr
        );

        auth::authenticate(&mut handle, params).await?;

        let check = handle
            .channel_open_session()
            .await
            .context("opening session channel")?;
        let _ = check.close().await;

        let sftp = if params.username == ROOT_USER {
            sftp::open_subsystem(&handle).await?
        } else {
            match sftp::open_with_sudo(&handle).await {
                Ok(sftp) => sftp,
                Err(err) => {
                    log::warn!(
                        "sudo sftp unavailable for {}@{}, using the unprivileged subsystem: {err:#}",
                        params.username,
                        params.addr
                    );
                    sftp::open_subsystem(&handle).await?
                }
            }
        };

        Ok(Self { handle, sftp })
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    pub(crate) async fn open_exec_stream(
        &self,
        command: &str,
    ) -> Result<russh::ChannelStream<russh::client::Msg>> {
        let chan = self
            .handle
            .channel_open_session()
            .await
            .context("open session")?;
        chan.exec(true, command).await.context("exec request")?;
        Ok(chan.into_stream())
    }

    pub(crate) async fn close(self) {
        let _ = self.sftp.close().await;
        if let Err(err) = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
        {
            log::debug!("error while disconnecting: {err}");
        }
    }
}
