// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

pub const DAEMON_BINARY_NAME: &str = "fleetd";

/// Locates the daemon binary to ship to hosts: `explicit` if given, otherwise a
/// `fleetd` next to the running executable, otherwise the first executable one on `$PATH`.
pub fn find_local_daemon(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        bail!("daemon binary not found at {}", path.display());
    }

    let beside_exe = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DAEMON_BINARY_NAME)));
    if let Some(candidate) = beside_exe.filter(|path| path.is_file()) {
        return Ok(candidate);
    }
    which::which(DAEMON_BINARY_NAME).with_context(|| {
        format!("could not find a local {DAEMON_BINARY_NAME} binary next to the executable or on PATH")
    })
}
