// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Host inventory file. Values under `[ssh]` apply to every `[[hosts]]` entry that does
//! not set them itself.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::host::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_USER, HostConfig};
use crate::rpc::BootstrapOptions;

#[derive(Debug, Default, Clone, Deserialize)]
pub struct SshSettings {
    pub user: Option<String>,
    pub password: Option<String>,
    pub encrypted: Option<bool>,
    pub identity_path: Option<String>,
    pub key_passphrase: Option<String>,
    pub port: Option<u16>,
    pub connect_timeout_secs: Option<u64>,
    pub command_timeout_secs: Option<u64>,
}

impl SshSettings {
    /// Fields set on `self` win over `defaults`.
    fn merged_over(&self, defaults: &SshSettings) -> SshSettings {
        SshSettings {
            user: self.user.clone().or_else(|| defaults.user.clone()),
            password: self.password.clone().or_else(|| defaults.password.clone()),
            encrypted: self.encrypted.or(defaults.encrypted),
            identity_path: self
                .identity_path
                .clone()
                .or_else(|| defaults.identity_path.clone()),
            key_passphrase: self
                .key_passphrase
                .clone()
                .or_else(|| defaults.key_passphrase.clone()),
            port: self.port.or(defaults.port),
            connect_timeout_secs: self.connect_timeout_secs.or(defaults.connect_timeout_secs),
            command_timeout_secs: self.command_timeout_secs.or(defaults.command_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostEntry {
    pub address: String,
    #[serde(default)]
    pub local: bool,
    #[serde(flatten)]
    pub ssh: SshSettings,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootstrapSettings {
    pub remote_binary_path: Option<String>,
    pub local_binary: Option<String>,
    pub port: Option<u16>,
    pub dial_timeout_secs: Option<u64>,
    pub ready_timeout_secs: Option<u64>,
    pub call_timeout_secs: Option<u64>,
    pub verify_on_checkout: Option<bool>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct FleetFile {
    #[serde(default)]
    pub ssh: SshSettings,
    #[serde(default)]
    pub hosts: Vec<HostEntry>,
    #[serde(default)]
    pub bootstrap: BootstrapSettings,
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl FleetFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read inventory {}", path.display()))?;
        let mut file = Self::parse(&contents)
            .with_context(|| format!("failed to parse inventory {}", path.display()))?;
        file.base_dir = path.parent().map(Path::to_path_buf);
        Ok(file)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn host_configs(&self) -> Vec<HostConfig> {
        self.hosts
            .iter()
            .map(|entry| {
                let ssh = entry.ssh.merged_over(&self.ssh);
                HostConfig {
                    address: entry.address.clone(),
                    port: ssh.port,
                    user: ssh.user.unwrap_or_else(|| DEFAULT_USER.to_string()),
                    password: ssh.password,
                    encrypted: ssh.encrypted.unwrap_or(false),
                    identity_path: ssh
                        .identity_path
                        .as_deref()
                        .map(|raw| resolve_path(raw, self.base_dir.as_deref())),
                    key_passphrase: ssh.key_passphrase,
                    local: entry.local,
                    connect_timeout: ssh
                        .connect_timeout_secs
                        .map(Duration::from_secs)
                        .unwrap_or(DEFAULT_CONNECT_TIMEOUT),
                    command_timeout: ssh.command_timeout_secs.map(Duration::from_secs),
                }
            })
            .collect()
    }

    pub fn bootstrap_options(&self) -> BootstrapOptions {
        let settings = &self.bootstrap;
        let mut options = BootstrapOptions::default();
        if let Some(path) = &settings.remote_binary_path {
            options.remote_binary_path = path.clone();
        }
        if let Some(raw) = &settings.local_binary {
            options.local_binary = Some(resolve_path(raw, self.base_dir.as_deref()));
        }
        if let Some(port) = settings.port {
            options.port = port;
        }
        if let Some(secs) = settings.dial_timeout_secs {
            options.dial_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = settings.ready_timeout_secs {
            options.ready_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = settings.call_timeout_secs {
            options.call_timeout = Duration::from_secs(secs);
        }
        if let Some(verify) = settings.verify_on_checkout {
            options.verify_on_checkout = verify;
        }
        options
    }
}

fn resolve_path(raw: &str, base_dir: Option<&Path>) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        return path;
    }
    match base_dir {
        Some(dir) => dir.join(path),
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const INVENTORY: &str = r#"
[ssh]
user = "deploy"
password = "secret"
connect_timeout_secs = 5

[[hosts]]
address = "10.0.0.5"

[[hosts]]
address = "10.0.0.6"
user = "admin"
port = 2222
command_timeout_secs = 60

[bootstrap]
dial_timeout_secs = 3
verify_on_checkout = true
"#;

    #[test]
    fn host_values_override_ssh_defaults() {
        let file = FleetFile::parse(INVENTORY).unwrap();
        let hosts = file.host_configs();
        assert_eq!(hosts.len(), 2);

        assert_eq!(hosts[0].user, "deploy");
        assert_eq!(hosts[0].password.as_deref(), Some("secret"));
        assert_eq!(hosts[0].port_or_default(), 22);
        assert_eq!(hosts[0].connect_timeout, Duration::from_secs(5));
        assert_eq!(hosts[0].command_timeout, None);

        assert_eq!(hosts[1].user, "admin");
        assert_eq!(hosts[1].password.as_deref(), Some("secret"));
        assert_eq!(hosts[1].port_or_default(), 2222);
        assert_eq!(hosts[1].command_timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn missing_tables_fall_back_to_defaults() {
        let file = FleetFile::parse("[[hosts]]\naddress = \"node-1\"\n").unwrap();
        let hosts = file.host_configs();
        assert_eq!(hosts[0].user, DEFAULT_USER);
        assert_eq!(hosts[0].connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert!(!hosts[0].local);

        let options = file.bootstrap_options();
        let defaults = BootstrapOptions::default();
        assert_eq!(options.port, defaults.port);
        assert_eq!(options.remote_binary_path, defaults.remote_binary_path);
    }

    #[test]
    fn bootstrap_table_overrides_defaults() {
        let file = FleetFile::parse(INVENTORY).unwrap();
        let options = file.bootstrap_options();
        assert_eq!(options.dial_timeout, Duration::from_secs(3));
        assert!(options.verify_on_checkout);
    }

    #[test]
    fn unknown_bootstrap_keys_are_rejected() {
        let err = FleetFile::parse("[bootstrap]\nprot = 1\n").unwrap_err();
        assert!(err.to_string().contains("prot"), "{err}");
    }

    #[test]
    fn relative_key_paths_resolve_against_inventory_dir() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fleet.toml");
        fs::write(
            &path,
            "[ssh]\nidentity_path = \"keys/id_ed25519\"\n\n[[hosts]]\naddress = \"10.0.0.5\"\n",
        )
        .unwrap();
        let file = FleetFile::load(&path).unwrap();
        let hosts = file.host_configs();
        assert_eq!(
            hosts[0].identity_path.as_deref(),
            Some(dir.path().join("keys/id_ed25519").as_path())
        );
    }

    #[test]
    fn missing_inventory_errors() {
        let dir = TempDir::new().unwrap();
        let err = FleetFile::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read inventory"));
    }
}
