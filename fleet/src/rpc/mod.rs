// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Client side of the per-host filesystem daemon: bootstrap, dialing and the
//! per-address connection registry.

mod binary;
mod client;
mod dial;
mod registry;

pub use binary::{DAEMON_BINARY_NAME, find_local_daemon};
pub use client::{FsClient, OsCall};
pub use registry::{
    BootstrapOptions, ConnectionRegistry, DEFAULT_CALL_TIMEOUT, DEFAULT_DIAL_TIMEOUT,
    DEFAULT_READY_TIMEOUT, DaemonConnector, GrpcConnector, REMOTE_BINARY_PATH,
};
