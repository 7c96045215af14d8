// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;
use std::time::Duration;

use thiserror::Error as ThisError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Step of the daemon bootstrap that produced a [`FleetError::Bootstrap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStep {
    BinaryCheck,
    Copy,
}

impl BootstrapStep {
    pub fn as_str(self) -> &'static str {
        match self {
            BootstrapStep::BinaryCheck => "binary check",
            BootstrapStep::Copy => "binary copy",
        }
    }
}

impl fmt::Display for BootstrapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, ThisError)]
pub enum FleetError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("duplicate host address {0}")]
    DuplicateHost(String),

    #[error("host {0} not found")]
    HostNotFound(String),

    #[error("{operation} is not implemented for local host {address}")]
    NotImplemented {
        address: String,
        operation: &'static str,
    },

    #[error("connection to {address} failed: {source}")]
    Connection {
        address: String,
        #[source]
        source: BoxError,
    },

    #[error("{}", format_execution(.address, .command, .exit_code, .stderr))]
    Execution {
        address: String,
        command: String,
        exit_code: Option<u32>,
        stderr: String,
    },

    #[error("transfer of {path} on {address} failed: {source}")]
    Transfer {
        address: String,
        path: String,
        #[source]
        source: BoxError,
    },

    #[error("bootstrap of {address} failed at {step}: {source}")]
    Bootstrap {
        address: String,
        step: BootstrapStep,
        #[source]
        source: BoxError,
    },

    #[error("rpc to {address} failed: {source}")]
    Protocol {
        address: String,
        #[source]
        source: BoxError,
    },

    #[error("{operation} on {address} timed out after {after:?}")]
    Timeout {
        address: String,
        operation: String,
        after: Duration,
    },
}

fn format_execution(
    address: &str,
    command: &str,
    exit_code: &Option<u32>,
    stderr: &str,
) -> String {
    let status = match exit_code {
        Some(code) => format!("exit code {code}"),
        None => "no exit status".to_string(),
    };
    let stderr = stderr.trim_end();
    if stderr.is_empty() {
        format!("command `{command}` on {address} failed ({status})")
    } else {
        format!("command `{command}` on {address} failed ({status}): {stderr}")
    }
}

impl FleetError {
    pub fn connection(address: &str, source: impl Into<BoxError>) -> Self {
        FleetError::Connection {
            address: address.to_string(),
            source: source.into(),
        }
    }

    pub fn transfer(address: &str, path: impl Into<String>, source: impl Into<BoxError>) -> Self {
        FleetError::Transfer {
            address: address.to_string(),
            path: path.into(),
            source: source.into(),
        }
    }

    pub fn protocol(address: &str, source: impl Into<BoxError>) -> Self {
        FleetError::Protocol {
            address: address.to_string(),
            source: source.into(),
        }
    }

    pub fn bootstrap(address: &str, step: BootstrapStep, source: impl Into<BoxError>) -> Self {
        FleetError::Bootstrap {
            address: address.to_string(),
            step,
            source: source.into(),
        }
    }

    /// Address of the host the error is attributed to, when there is one.
    pub fn address(&self) -> Option<&str> {
        match self {
            FleetError::InvalidConfig(_) => None,
            FleetError::DuplicateHost(address) | FleetError::HostNotFound(address) => Some(address),
            FleetError::NotImplemented { address, .. }
            | FleetError::Connection { address, .. }
            | FleetError::Execution { address, .. }
            | FleetError::Transfer { address, .. }
            | FleetError::Bootstrap { address, .. }
            | FleetError::Protocol { address, .. }
            | FleetError::Timeout { address, .. } => Some(address),
        }
    }
}

pub type FleetResult<T> = Result<T, FleetError>;
