// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::Mutex;

use crate::crypto::PasswordDecryptor;
use crate::errors::{FleetError, FleetResult};
use crate::net::lookup_first_addr;
use crate::ssh::{SshParams, Transport};

mod local;
mod platform;
mod session;
mod transfer;

pub use platform::Platform;
pub use session::ExecutionSession;

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_USER: &str = "root";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Canonical string form of a host address: IP addresses are round-tripped through
/// [`IpAddr`], hostnames are trimmed and lower-cased.
pub fn canonical_address(address: &str) -> String {
    let trimmed = address.trim();
    let unbracketed = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(trimmed);
    match unbracketed.parse::<IpAddr>() {
        Ok(ip) => ip.to_string(),
        Err(_) => trimmed.to_ascii_lowercase(),
    }
}

/// Static configuration of one machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostConfig {
    pub address: String,
    pub port: Option<u16>,
    pub user: String,
    pub password: Option<String>,
    /// The password must go through a [`PasswordDecryptor`] before use.
    pub encrypted: bool,
    pub identity_path: Option<PathBuf>,
    pub key_passphrase: Option<String>,
    /// Treat the host as the machine the orchestrator runs on even if its address
    /// does not look local.
    pub local: bool,
    pub connect_timeout: Duration,
    /// Deadline applied to every command and transfer on this host.
    pub command_timeout: Option<Duration>,
}

impl HostConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: None,
            user: DEFAULT_USER.to_string(),
            password: None,
            encrypted: false,
            identity_path: None,
            key_passphrase: None,
            local: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: None,
        }
    }

    pub fn with_password(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = Some(password.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn local(mut self) -> Self {
        self.local = true;
        self
    }

    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_SSH_PORT)
    }
}

/// One remote machine: static config plus its lazily opened transport.
pub struct Host {
    address: String,
    config: HostConfig,
    is_local: bool,
    decryptor: Arc<dyn PasswordDecryptor>,
    // Held for the duration of every operation, which serializes use of the session.
    transport: Mutex<Option<Transport>>,
}

impl Host {
    pub fn new(config: HostConfig, decryptor: Arc<dyn PasswordDecryptor>) -> Self {
        let address = canonical_address(&config.address);
        let is_local = config.local || local::is_local_address(&address);
        Self {
            address,
            config,
            is_local,
            decryptor,
            transport: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn is_local(&self) -> bool {
        self.is_local
    }

    /// Whether an open transport is currently held. Local hosts never hold one.
    pub async fn is_connected(&self) -> bool {
        match self.transport.lock().await.as_ref() {
            Some(transport) => !transport.is_closed(),
            None => false,
        }
    }

    /// Opens the transport, a session channel and the file-transfer channel.
    /// All-or-nothing: on failure the host keeps no connection state.
    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self),
        fields(op = "initialize", host = %self.address)
    )]
    pub async fn initialize(&self) -> FleetResult<()> {
        if self.is_local {
            log::debug!("{} is the local machine, nothing to connect", self.address);
            return Ok(());
        }
        let mut guard = self.transport.lock().await;
        if let Some(old) = guard.take() {
            old.close().await;
        }
        let params = self.ssh_params().await?;
        let transport = Transport::open(&params)
            .await
            .map_err(|err| FleetError::connection(&self.address, err))?;
        *guard = Some(transport);
        log::info!("initialized ssh connection to {}", self.address);
        Ok(())
    }

    /// Drops the transport; every channel derived from it becomes unusable.
    pub async fn close(&self) {
        if let Some(transport) = self.transport.lock().await.take() {
            transport.close().await;
            log::debug!("closed ssh connection to {}", self.address);
        }
    }

    async fn ssh_params(&self) -> FleetResult<SshParams> {
        let addr = lookup_first_addr(&self.address, self.config.port_or_default())
            .await
            .map_err(|err| FleetError::connection(&self.address, err))?;
        let password = match (&self.config.password, self.config.encrypted) {
            (Some(cipher), true) => Some(
                self.decryptor
                    .decrypt(cipher)
                    .context("decrypting password")
                    .map_err(|err| FleetError::connection(&self.address, err))?,
            ),
            (plain, false) => plain.clone(),
            (None, true) => None,
        };
        Ok(SshParams {
            addr,
            username: self.config.user.clone(),
            password,
            identity_path: self.config.identity_path.clone(),
            key_passphrase: self.config.key_passphrase.clone(),
            connect_timeout: self.config.connect_timeout,
        })
    }
}
