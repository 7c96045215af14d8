// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Remote execution on a [`Host`]: commands, file transfers and small host checks.

use std::collections::VecDeque;
use std::future::Future;
use std::path::Path;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::{MappedMutexGuard, MutexGuard};

use super::platform::Platform;
use super::transfer::{self, parse_sha256_output, plan_dir_copy};
use super::{Host, local};
use crate::errors::{FleetError, FleetResult};
use crate::ssh::utils::{ensure_absolute, sh_escape};
use crate::ssh::{ExecOutput, Transport, parse_mode};

/// Lines of output kept for the error of a failing [`Host::cmd_async`] command.
const OUTPUT_TAIL_LINES: usize = 20;

/// The slice of a host's execution capabilities the daemon bootstrap relies on.
#[async_trait]
pub trait ExecutionSession: Send + Sync {
    fn address(&self) -> &str;

    async fn is_file_exist(&self, path: &str) -> FleetResult<bool>;

    async fn make_dir_all(&self, path: &str, mode: u32) -> FleetResult<()>;

    async fn copy_to_remote(&self, local: &Path, remote: &str, permissions: &str)
    -> FleetResult<()>;

    async fn combined_output(&self, cmd: &str) -> FleetResult<Vec<u8>>;
}

impl Host {
    /// Locks the transport, connecting first when no live transport is held.
    async fn connected(&self) -> FleetResult<MappedMutexGuard<'_, Transport>> {
        let mut guard = self.transport.lock().await;
        if guard.as_ref().is_none_or(|t| t.is_closed()) {
            if let Some(stale) = guard.take() {
                log::debug!("ssh connection to {} was closed, reconnecting", self.address);
                stale.close().await;
            }
            let params = self.ssh_params().await?;
            let transport = Transport::open(&params)
                .await
                .map_err(|err| FleetError::connection(&self.address, err))?;
            *guard = Some(transport);
        }
        MutexGuard::try_map(guard, |slot| slot.as_mut())
            .map_err(|_| FleetError::connection(&self.address, anyhow!("not connected")))
    }

    async fn with_deadline<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = FleetResult<T>>,
    ) -> FleetResult<T> {
        match self.config.command_timeout {
            Some(after) => tokio::time::timeout(after, fut)
                .await
                .map_err(|_| FleetError::Timeout {
                    address: self.address.clone(),
                    operation: operation.to_string(),
                    after,
                })?,
            None => fut.await,
        }
    }

    async fn exec(&self, cmd: &str, merge_streams: bool) -> FleetResult<ExecOutput> {
        self.with_deadline(cmd, async {
            let out = if self.is_local {
                if merge_streams {
                    local::exec_combined(cmd).await
                } else {
                    local::exec_capture(cmd).await
                }
            } else {
                let transport = self.connected().await?;
                transport.exec_capture(cmd).await
            };
            out.map_err(|err| {
                FleetError::connection(&self.address, err.context(format!("running `{cmd}`")))
            })
        })
        .await
    }

    fn execution_error(&self, cmd: &str, out: &ExecOutput, stderr: String) -> FleetError {
        FleetError::Execution {
            address: self.address.clone(),
            command: cmd.to_string(),
            exit_code: out.exit_code,
            stderr,
        }
    }

    fn ensure_remote(&self, operation: &'static str) -> FleetResult<()> {
        if self.is_local {
            return Err(FleetError::NotImplemented {
                address: self.address.clone(),
                operation,
            });
        }
        Ok(())
    }

    /// Runs `cmd` and returns its standard output.
    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self),
        fields(op = "output", host = %self.address)
    )]
    pub async fn output(&self, cmd: &str) -> FleetResult<Vec<u8>> {
        let out = self.exec(cmd, false).await?;
        if !out.success() {
            return Err(self.execution_error(cmd, &out, String::new()));
        }
        Ok(out.stdout)
    }

    /// Runs `cmd` and returns standard output and standard error interleaved.
    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self),
        fields(op = "combined_output", host = %self.address)
    )]
    pub async fn combined_output(&self, cmd: &str) -> FleetResult<Vec<u8>> {
        let out = self.exec(cmd, true).await?;
        if !out.success() {
            let text = String::from_utf8_lossy(&out.combined).into_owned();
            return Err(self.execution_error(cmd, &out, text));
        }
        Ok(out.combined)
    }

    /// Runs `cmd` and returns stdout; on failure the error carries stderr verbatim.
    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self),
        fields(op = "run_and_stderr", host = %self.address)
    )]
    pub async fn run_and_stderr(&self, cmd: &str) -> FleetResult<Vec<u8>> {
        let out = self.exec(cmd, false).await?;
        if !out.success() {
            return Err(self.execution_error(cmd, &out, out.stderr_lossy()));
        }
        Ok(out.stdout)
    }

    /// Combined output as text with newlines replaced by `sep`.
    pub async fn cmd_to_string(&self, cmd: &str, sep: &str) -> FleetResult<String> {
        let out = self.combined_output(cmd).await?;
        let text = String::from_utf8_lossy(&out);
        Ok(text.trim_end_matches('\n').replace('\n', sep))
    }

    /// Runs `cmds` in order, logging their output line by line as it arrives. Stops at the
    /// first command that fails; the error carries the last lines it printed.
    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, cmds),
        fields(op = "cmd_async", host = %self.address, count = cmds.len())
    )]
    pub async fn cmd_async(&self, cmds: &[&str]) -> FleetResult<()> {
        for cmd in cmds.iter().map(|cmd| cmd.trim()).filter(|cmd| !cmd.is_empty()) {
            let mut tail = VecDeque::with_capacity(OUTPUT_TAIL_LINES);
            let address = self.address.as_str();
            let mut on_line = |line: &str| {
                log::info!("[{address}] {line}");
                if tail.len() == OUTPUT_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line.to_string());
            };
            let exit_code = self
                .with_deadline(cmd, async {
                    let result = if self.is_local {
                        local::exec_streaming(cmd, &mut on_line).await
                    } else {
                        let transport = self.connected().await?;
                        transport.exec_streaming(cmd, &mut on_line).await
                    };
                    result.map_err(|err| {
                        FleetError::connection(&self.address, err.context(format!("running `{cmd}`")))
                    })
                })
                .await?;
            if exit_code != Some(0) {
                let mut output = Vec::from(tail).join("\n");
                if !output.is_empty() {
                    output.push('\n');
                }
                return Err(FleetError::Execution {
                    address: self.address.clone(),
                    command: cmd.to_string(),
                    exit_code,
                    stderr: output,
                });
            }
        }
        Ok(())
    }

    /// Operating system and architecture reported by `uname`.
    pub async fn platform(&self) -> FleetResult<Platform> {
        const CMD: &str = "uname -s -m";
        let out = self.run_and_stderr(CMD).await?;
        let text = String::from_utf8_lossy(&out);
        Platform::from_uname(&text).ok_or_else(|| FleetError::Execution {
            address: self.address.clone(),
            command: CMD.to_string(),
            exit_code: Some(0),
            stderr: format!("unrecognised uname output {:?}", text.trim()),
        })
    }

    /// Connects if needed and runs a no-op command.
    pub async fn ping(&self) -> FleetResult<()> {
        self.output("true").await.map(|_| ())
    }

    /// Uploads one file with the given symbolic mode (`"0644"`).
    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, local),
        fields(op = "copy_to_remote", host = %self.address, local = %local.display())
    )]
    pub async fn copy_to_remote(
        &self,
        local: &Path,
        remote: &str,
        permissions: &str,
    ) -> FleetResult<()> {
        self.ensure_remote("copy to remote")?;
        let transfer_err = |err: anyhow::Error| FleetError::transfer(&self.address, remote, err);
        if !local.is_absolute() {
            return Err(transfer_err(anyhow!(
                "path must be absolute: {}",
                local.display()
            )));
        }
        ensure_absolute(remote).map_err(transfer_err)?;
        let mode = parse_mode(permissions).map_err(transfer_err)?;

        self.with_deadline("copy to remote", async {
            let transport = self.connected().await?;
            transfer::upload_file(&*transport, local, remote, mode)
                .await
                .map_err(transfer_err)?;
            log::debug!("copied {} to {}:{}", local.display(), self.address, remote);
            Ok(())
        })
        .await
    }

    /// Downloads one remote file to `local`, keeping the remote permission bits.
    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, local),
        fields(op = "copy_from_remote", host = %self.address, local = %local.display())
    )]
    pub async fn copy_from_remote(&self, local: &Path, remote: &str) -> FleetResult<()> {
        self.ensure_remote("copy from remote")?;
        let transfer_err = |err: anyhow::Error| FleetError::transfer(&self.address, remote, err);
        if !local.is_absolute() {
            return Err(transfer_err(anyhow!(
                "path must be absolute: {}",
                local.display()
            )));
        }
        ensure_absolute(remote).map_err(transfer_err)?;

        self.with_deadline("copy from remote", async {
            let transport = self.connected().await?;
            let header = transfer::download_file(&*transport, local, remote)
                .await
                .map_err(transfer_err)?;
            log::debug!(
                "copied {}:{} ({} bytes) to {}",
                self.address,
                remote,
                header.size,
                local.display()
            );
            Ok(())
        })
        .await
    }

    /// Uploads `local_dir` so that it lands as `remote_dir/<basename of local_dir>`.
    /// The first failing entry aborts; entries already copied stay in place.
    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, local_dir),
        fields(op = "copy_to_remote_dir", host = %self.address, local = %local_dir.display())
    )]
    pub async fn copy_to_remote_dir(&self, local_dir: &Path, remote_dir: &str) -> FleetResult<()> {
        self.ensure_remote("copy directory to remote")?;
        let transfer_err = |err: anyhow::Error| FleetError::transfer(&self.address, remote_dir, err);
        if !local_dir.is_absolute() {
            return Err(transfer_err(anyhow!(
                "path must be absolute: {}",
                local_dir.display()
            )));
        }
        ensure_absolute(remote_dir).map_err(transfer_err)?;
        let steps = plan_dir_copy(local_dir, remote_dir).map_err(transfer_err)?;

        self.with_deadline("copy directory to remote", async {
            let transport = self.connected().await?;
            transfer::upload_tree(&*transport, &steps)
                .await
                .map_err(transfer_err)?;
            log::debug!(
                "copied {} entries of {} to {}:{}",
                steps.len(),
                local_dir.display(),
                self.address,
                remote_dir
            );
            Ok(())
        })
        .await
    }

    pub async fn is_file_exist(&self, path: &str) -> FleetResult<bool> {
        if self.is_local {
            return tokio::fs::try_exists(path)
                .await
                .map_err(|err| FleetError::transfer(&self.address, path, err));
        }
        let transport = self.connected().await?;
        transport
            .path_exists(path)
            .await
            .map_err(|err| FleetError::transfer(&self.address, path, err))
    }

    pub async fn remote_dir_exist(&self, path: &str) -> FleetResult<bool> {
        if self.is_local {
            return Ok(tokio::fs::metadata(path)
                .await
                .map(|meta| meta.is_dir())
                .unwrap_or(false));
        }
        let transport = self.connected().await?;
        transport
            .dir_exists(path)
            .await
            .map_err(|err| FleetError::transfer(&self.address, path, err))
    }

    /// Creates `path` and its missing parents; newly created directories get `mode`.
    pub async fn make_dir_all(&self, path: &str, mode: u32) -> FleetResult<()> {
        if self.is_local {
            return tokio::fs::DirBuilder::new()
                .recursive(true)
                .mode(mode)
                .create(path)
                .await
                .map_err(|err| FleetError::transfer(&self.address, path, err));
        }
        ensure_absolute(path).map_err(|err| FleetError::transfer(&self.address, path, err))?;
        let transport = self.connected().await?;
        transport
            .ensure_remote_dir(path, mode)
            .await
            .map_err(|err| FleetError::transfer(&self.address, path, err))
    }

    /// SHA-256 of a remote file, `None` when the file does not exist.
    pub async fn remote_sha256(&self, path: &str) -> FleetResult<Option<String>> {
        if !self.is_file_exist(path).await? {
            return Ok(None);
        }
        let cmd = format!("sha256sum {}", sh_escape(path));
        let out = self.run_and_stderr(&cmd).await?;
        parse_sha256_output(&out).map(Some).ok_or_else(|| {
            FleetError::transfer(&self.address, path, anyhow!("unexpected sha256sum output"))
        })
    }

    /// Uploads `local` unless the remote copy already has the same checksum, and checks
    /// the checksum again after uploading.
    pub async fn copy_to_remote_verified(
        &self,
        local: &Path,
        remote: &str,
        permissions: &str,
    ) -> FleetResult<()> {
        self.ensure_remote("verified copy to remote")?;
        let transfer_err = |err: anyhow::Error| FleetError::transfer(&self.address, remote, err);
        if !local.is_absolute() {
            return Err(transfer_err(anyhow!(
                "path must be absolute: {}",
                local.display()
            )));
        }
        ensure_absolute(remote).map_err(transfer_err)?;
        let mode = parse_mode(permissions).map_err(transfer_err)?;

        self.with_deadline("verified copy to remote", async {
            let transport = self.connected().await?;
            let copied = transfer::upload_verified(&*transport, local, remote, mode)
                .await
                .map_err(transfer_err)?;
            if !copied {
                log::debug!("{}:{} is up to date", self.address, remote);
            }
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl ExecutionSession for Host {
    fn address(&self) -> &str {
        Host::address(self)
    }

    async fn is_file_exist(&self, path: &str) -> FleetResult<bool> {
        Host::is_file_exist(self, path).await
    }

    async fn make_dir_all(&self, path: &str, mode: u32) -> FleetResult<()> {
        Host::make_dir_all(self, path, mode).await
    }

    async fn copy_to_remote(
        &self,
        local: &Path,
        remote: &str,
        permissions: &str,
    ) -> FleetResult<()> {
        Host::copy_to_remote(self, local, remote, permissions).await
    }

    async fn combined_output(&self, cmd: &str) -> FleetResult<Vec<u8>> {
        Host::combined_output(self, cmd).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::RejectEncrypted;
    use crate::host::HostConfig;
    use std::sync::Arc;
    use std::time::Duration;

    fn local_host() -> Host {
        Host::new(HostConfig::new("127.0.0.1"), Arc::new(RejectEncrypted))
    }

    #[tokio::test]
    async fn output_returns_stdout_only() {
        let host = local_host();
        let out = host.output("echo hello; echo noise >&2").await.unwrap();
        assert_eq!(out, b"hello\n");
    }

    #[tokio::test]
    async fn combined_output_merges_streams() {
        let host = local_host();
        let out = host.combined_output("echo one; echo two >&2").await.unwrap();
        assert_eq!(out, b"one\ntwo\n");
    }

    #[tokio::test]
    async fn run_and_stderr_embeds_stderr_in_error() {
        let host = local_host();
        let err = host
            .run_and_stderr("echo 'disk quota exceeded' >&2; exit 4")
            .await
            .unwrap_err();
        match &err {
            FleetError::Execution {
                address,
                exit_code,
                stderr,
                ..
            } => {
                assert_eq!(address, "127.0.0.1");
                assert_eq!(*exit_code, Some(4));
                assert_eq!(stderr, "disk quota exceeded\n");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.to_string().contains("disk quota exceeded"));
    }

    #[tokio::test]
    async fn run_and_stderr_returns_stdout_on_success() {
        let host = local_host();
        let out = host.run_and_stderr("printf ok").await.unwrap();
        assert_eq!(out, b"ok");
    }

    #[tokio::test]
    async fn cmd_to_string_joins_lines() {
        let host = local_host();
        let text = host.cmd_to_string("printf 'a\\nb\\nc\\n'", ",").await.unwrap();
        assert_eq!(text, "a,b,c");
    }

    #[tokio::test]
    async fn command_timeout_is_enforced() {
        let config = HostConfig {
            command_timeout: Some(Duration::from_millis(100)),
            ..HostConfig::new("127.0.0.1")
        };
        let host = Host::new(config, Arc::new(RejectEncrypted));
        let err = host.output("sleep 5").await.unwrap_err();
        assert!(matches!(err, FleetError::Timeout { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn local_copies_are_not_implemented() {
        let host = local_host();
        let err = host
            .copy_to_remote(Path::new("/etc/hostname"), "/tmp/hostname", "0644")
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::NotImplemented { .. }));
        let err = host
            .copy_from_remote(Path::new("/tmp/hostname"), "/etc/hostname")
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::NotImplemented { .. }));
        let err = host
            .copy_to_remote_dir(Path::new("/etc"), "/tmp")
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::NotImplemented { .. }));
    }

    #[tokio::test]
    async fn local_existence_checks() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("marker");
        std::fs::write(&file, b"x").unwrap();
        let host = local_host();
        assert!(host.is_file_exist(file.to_str().unwrap()).await.unwrap());
        assert!(!host.remote_dir_exist(file.to_str().unwrap()).await.unwrap());
        assert!(host.remote_dir_exist(dir.path().to_str().unwrap()).await.unwrap());
        let missing = dir.path().join("missing");
        assert!(!host.is_file_exist(missing.to_str().unwrap()).await.unwrap());
    }

    #[tokio::test]
    async fn remote_sha256_matches_local_digest() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("payload");
        std::fs::write(&file, b"fleet").unwrap();
        let host = local_host();
        let remote = host
            .remote_sha256(file.to_str().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(remote, transfer::local_sha256(&file).await.unwrap());
        let missing = dir.path().join("missing");
        assert_eq!(host.remote_sha256(missing.to_str().unwrap()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn cmd_async_runs_commands_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("steps");
        let log = log.to_str().unwrap();
        let first = format!("echo first >> {log}");
        let second = format!("echo second >> {log}");
        let host = local_host();
        host.cmd_async(&[first.as_str(), "  ", second.as_str()])
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(log).unwrap(), "first\nsecond\n");
    }

    #[tokio::test]
    async fn cmd_async_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("never");
        let touch = format!("touch {}", marker.display());
        let host = local_host();
        let err = host
            .cmd_async(&["echo preparing; echo 'no space left' >&2; exit 7", touch.as_str()])
            .await
            .unwrap_err();
        match &err {
            FleetError::Execution {
                exit_code, stderr, ..
            } => {
                assert_eq!(*exit_code, Some(7));
                assert!(stderr.contains("no space left"), "{stderr:?}");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn platform_of_local_machine() {
        let platform = local_host().platform().await.unwrap();
        assert_eq!(platform.os, std::env::consts::OS);
        assert!(!platform.architecture.is_empty());
    }

    #[tokio::test]
    async fn copy_to_remote_dir_rejects_relative_source_before_connecting() {
        // Unroutable, so any connection attempt would surface as a connection error.
        let host = Host::new(HostConfig::new("192.0.2.1"), Arc::new(RejectEncrypted));
        let err = host
            .copy_to_remote_dir(Path::new("build/app"), "/srv")
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::Transfer { .. }), "{err:?}");
        assert!(err.to_string().contains("must be absolute"), "{err}");
    }
}
