// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::net::{IpAddr, UdpSocket};
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::ssh::ExecOutput;

/// Whether `address` designates the machine this process runs on: a loopback address,
/// `localhost`, or an address bound to one of the local interfaces.
pub(crate) fn is_local_address(address: &str) -> bool {
    if address.eq_ignore_ascii_case("localhost") {
        return true;
    }
    let Ok(ip) = address.parse::<IpAddr>() else {
        return false;
    };
    if ip.is_loopback() {
        return true;
    }
    if ip.is_unspecified() || ip.is_multicast() {
        return false;
    }
    // Binding succeeds only for addresses assigned to a local interface.
    UdpSocket::bind((ip, 0)).is_ok()
}

/// Runs `cmd` through `sh -c`, capturing both streams separately.
pub(crate) async fn exec_capture(cmd: &str) -> Result<ExecOutput> {
    log::debug!("executing locally '{}'", cmd);
    let output = Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| format!("spawning local command '{cmd}'"))?;
    let mut combined = output.stdout.clone();
    combined.extend_from_slice(&output.stderr);
    Ok(ExecOutput {
        stdout: output.stdout,
        stderr: output.stderr,
        combined,
        exit_code: output.status.code().and_then(|code| u32::try_from(code).ok()),
    })
}

/// Runs `cmd` with stderr redirected into stdout so the combined buffer keeps arrival order.
pub(crate) async fn exec_combined(cmd: &str) -> Result<ExecOutput> {
    let merged = format!("{{ {cmd}\n}} 2>&1");
    let mut output = exec_capture(&merged).await?;
    output.combined = output.stdout.clone();
    Ok(output)
}

/// Runs `cmd` with stderr folded into stdout, handing each line to `on_line` as it is
/// printed. Returns the exit code.
pub(crate) async fn exec_streaming(cmd: &str, mut on_line: impl FnMut(&str)) -> Result<Option<u32>> {
    log::debug!("streaming locally '{}'", cmd);
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(format!("{{ {cmd}\n}} 2>&1"))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("spawning local command '{cmd}'"))?;
    if let Some(stdout) = child.stdout.take() {
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await.context("reading command output")? {
            on_line(&line);
        }
    }
    let status = child.wait().await.context("waiting for local command")?;
    Ok(status.code().and_then(|code| u32::try_from(code).ok()))
}
