// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Execution layer for a fleet of machines reached over SSH: host connections,
//! remote commands and file transfers, and bootstrap of the `fleetd` filesystem
//! daemon on each host.

pub mod config;
pub mod crypto;
pub mod errors;
pub mod host;
pub mod net;
pub mod pool;
pub mod rpc;
mod ssh;

pub use errors::{FleetError, FleetResult};
pub use host::{ExecutionSession, Host, HostConfig, Platform};
pub use pool::HostPool;
pub use rpc::{BootstrapOptions, ConnectionRegistry, FsClient};
pub use ssh::{AuthenticationFailure, ExecOutput, format_mode, parse_mode};
