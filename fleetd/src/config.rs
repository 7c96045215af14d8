// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Daemon settings. Each value comes from the command line, then `fleetd.toml`, then
//! the built-in default; the file is located by `--config`, then `FLEETD_CONFIG_PATH`,
//! then the user config directory.

use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

pub const CONFIG_ENV_VAR: &str = "FLEETD_CONFIG_PATH";
pub const DEFAULT_PORT: u16 = proto::DEFAULT_PORT;
pub const DEFAULT_LISTEN: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    port: Option<u16>,
    listen: Option<IpAddr>,
    verbose: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    CommandLine,
    Env,
    File,
    Default,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Source::CommandLine => "command line",
            Source::Env => "env",
            Source::File => "config file",
            Source::Default => "default",
        })
    }
}

/// A resolved value and where it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Setting<T> {
    pub value: T,
    pub source: Source,
}

impl<T> Setting<T> {
    fn resolve(cli: Option<T>, file: Option<T>, default: T) -> Self {
        match (cli, file) {
            (Some(value), _) => Self {
                value,
                source: Source::CommandLine,
            },
            (None, Some(value)) => Self {
                value,
                source: Source::File,
            },
            (None, None) => Self {
                value: default,
                source: Source::Default,
            },
        }
    }
}

/// Values given on the command line.
#[derive(Debug, Default)]
pub struct Overrides {
    pub port: Option<u16>,
    pub listen: Option<IpAddr>,
    pub verbose: Option<bool>,
}

#[derive(Debug)]
pub struct Config {
    pub port: Setting<u16>,
    pub listen: Setting<IpAddr>,
    pub verbose: Setting<bool>,
    /// Config file consulted, if any could be located.
    pub file: Option<Setting<PathBuf>>,
}

impl Config {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen.value, self.port.value)
    }

    pub fn log_summary(&self) {
        match &self.file {
            Some(file) => log::info!(
                "config file {} ({}, present={})",
                file.value.display(),
                file.source,
                file.value.exists()
            ),
            None => log::info!("no config file"),
        }
        log::info!(
            "listening on {} (address from {}, port from {})",
            self.listen_addr(),
            self.listen.source,
            self.port.source
        );
        log::debug!("verbose={} ({})", self.verbose.value, self.verbose.source);
    }
}

pub fn load(config_path: Option<PathBuf>, overrides: Overrides) -> Result<Config> {
    let default_path = dirs::config_dir().map(|dir| dir.join("fleet").join("fleetd.toml"));
    let file = locate_config(config_path, std::env::var_os(CONFIG_ENV_VAR), default_path)?;
    let contents = match &file {
        Some(file) => read_config_file(&file.value, file.source != Source::Default)?,
        None => FileConfig::default(),
    };

    let port = Setting::resolve(overrides.port, contents.port, DEFAULT_PORT);
    if port.value == 0 {
        bail!("port must be between 1 and 65535");
    }
    Ok(Config {
        port,
        listen: Setting::resolve(overrides.listen, contents.listen, DEFAULT_LISTEN),
        verbose: Setting::resolve(overrides.verbose, contents.verbose, false),
        file,
    })
}

/// Explicit and env paths must exist; the default one is optional.
fn locate_config(
    cli: Option<PathBuf>,
    env: Option<OsString>,
    default: Option<PathBuf>,
) -> Result<Option<Setting<PathBuf>>> {
    if let Some(path) = cli {
        return Ok(Some(Setting {
            value: expand_tilde(&path),
            source: Source::CommandLine,
        }));
    }
    if let Some(value) = env {
        if value.is_empty() {
            bail!("{CONFIG_ENV_VAR} is set but empty");
        }
        return Ok(Some(Setting {
            value: expand_tilde(Path::new(&value)),
            source: Source::Env,
        }));
    }
    Ok(default.map(|value| Setting {
        value,
        source: Source::Default,
    }))
}

fn read_config_file(path: &Path, required: bool) -> Result<FileConfig> {
    if !path.exists() {
        if required {
            bail!("config file not found at {}", path.display());
        }
        return Ok(FileConfig::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn expand_tilde(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}
