// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! File transfers over anything that can reach a remote `scp` and create directories.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use walkdir::WalkDir;

use crate::ssh::scp::{self, FileHeader};
use crate::ssh::utils::sh_escape;
use crate::ssh::Transport;

/// Remote side of a transfer.
#[async_trait]
pub(crate) trait TransferChannel: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    /// Stream to a remote `scp -t` that will write `remote`.
    async fn open_sink(&self, remote: &str) -> Result<Self::Stream>;

    /// Stream from a remote `scp -f` that reads `remote`.
    async fn open_source(&self, remote: &str) -> Result<Self::Stream>;

    async fn make_dir_all(&self, path: &str, mode: u32) -> Result<()>;

    /// Lower-case hex SHA-256 of `path`, `None` when it does not exist.
    async fn sha256(&self, path: &str) -> Result<Option<String>>;
}

#[async_trait]
impl TransferChannel for Transport {
    type Stream = russh::ChannelStream<russh::client::Msg>;

    async fn open_sink(&self, remote: &str) -> Result<Self::Stream> {
        self.open_exec_stream(&scp::sink_command(remote)).await
    }

    async fn open_source(&self, remote: &str) -> Result<Self::Stream> {
        self.open_exec_stream(&scp::source_command(remote)).await
    }

    async fn make_dir_all(&self, path: &str, mode: u32) -> Result<()> {
        self.ensure_remote_dir(path, mode).await
    }

    async fn sha256(&self, path: &str) -> Result<Option<String>> {
        if !self.path_exists(path).await? {
            return Ok(None);
        }
        let out = self
            .exec_capture(&format!("sha256sum {}", sh_escape(path)))
            .await?;
        if !out.success() {
            bail!("sha256sum {path}: {}", out.stderr_lossy().trim());
        }
        parse_sha256_output(&out.stdout)
            .map(Some)
            .ok_or_else(|| anyhow!("unexpected sha256sum output for {path}"))
    }
}

/// One entry of a directory upload: a directory to create or a file to copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CopyStep {
    pub local: PathBuf,
    pub remote: String,
    pub mode: u32,
    pub is_dir: bool,
}

/// Maps every path under `local_dir` to `remote_dir/<basename of local_dir>/<relative path>`,
/// in walk order so parents always precede their children.
pub(crate) fn plan_dir_copy(local_dir: &Path, remote_dir: &str) -> Result<Vec<CopyStep>> {
    let meta = std::fs::metadata(local_dir)
        .with_context(|| format!("reading {}", local_dir.display()))?;
    if !meta.is_dir() {
        bail!("{} is not a directory", local_dir.display());
    }
    let base = local_dir
        .file_name()
        .ok_or_else(|| anyhow!("{} has no final component", local_dir.display()))?;
    let target_root = Path::new(remote_dir).join(base);

    let mut steps = Vec::new();
    for entry in WalkDir::new(local_dir).follow_links(false).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walking {}", local_dir.display()))?;
        let rel = entry
            .path()
            .strip_prefix(local_dir)
            .with_context(|| format!("relativizing {}", entry.path().display()))?;
        let remote = if rel.as_os_str().is_empty() {
            target_root.clone()
        } else {
            target_root.join(rel)
        };
        let meta = entry
            .metadata()
            .with_context(|| format!("reading {}", entry.path().display()))?;
        steps.push(CopyStep {
            local: entry.path().to_path_buf(),
            remote: remote.to_string_lossy().into_owned(),
            mode: file_mode(&meta),
            is_dir: meta.is_dir(),
        });
    }
    Ok(steps)
}

#[cfg(unix)]
fn file_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(meta: &std::fs::Metadata) -> u32 {
    if meta.is_dir() { 0o755 } else { 0o644 }
}

pub(crate) fn parse_sha256_output(output: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(output);
    let digest = text.split_whitespace().next()?;
    (digest.len() == 64 && digest.bytes().all(|b| b.is_ascii_hexdigit()))
        .then(|| digest.to_ascii_lowercase())
}

pub(crate) async fn local_sha256(path: &Path) -> Result<String> {
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let digest = Sha256::digest(&content);
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

#[cfg(unix)]
async fn set_local_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777))
        .await
        .with_context(|| format!("setting mode of {}", path.display()))
}

#[cfg(not(unix))]
async fn set_local_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// Uploads `local` as `remote` with `mode`. Returns the number of bytes sent.
pub(crate) async fn upload_file<C: TransferChannel>(
    chan: &C,
    local: &Path,
    remote: &str,
    mode: u32,
) -> Result<u64> {
    let name = Path::new(remote)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("remote path has no file name: {remote}"))?;
    let mut file = tokio::fs::File::open(local)
        .await
        .with_context(|| format!("opening {}", local.display()))?;
    let size = file
        .metadata()
        .await
        .with_context(|| format!("reading {}", local.display()))?
        .len();

    let mut stream = chan.open_sink(remote).await?;
    scp::send_file(&mut stream, &name, mode, size, &mut file).await?;
    let _ = stream.shutdown().await;
    Ok(size)
}

/// Downloads `remote` to `local` and applies the remote permission bits.
pub(crate) async fn download_file<C: TransferChannel>(
    chan: &C,
    local: &Path,
    remote: &str,
) -> Result<FileHeader> {
    let mut stream = chan.open_source(remote).await?;
    let mut file = tokio::fs::File::create(local)
        .await
        .with_context(|| format!("creating {}", local.display()))?;
    let header = scp::receive_file(&mut stream, &mut file).await?;
    let _ = stream.shutdown().await;
    drop(file);
    set_local_mode(local, header.mode).await?;
    Ok(header)
}

/// Replays a [`plan_dir_copy`] plan. Stops at the first failing step.
pub(crate) async fn upload_tree<C: TransferChannel>(chan: &C, steps: &[CopyStep]) -> Result<()> {
    for step in steps {
        if step.is_dir {
            chan.make_dir_all(&step.remote, step.mode)
                .await
                .with_context(|| format!("creating {}", step.remote))?;
        } else {
            upload_file(chan, &step.local, &step.remote, step.mode)
                .await
                .with_context(|| format!("copying {} to {}", step.local.display(), step.remote))?;
        }
    }
    Ok(())
}

/// Uploads `local` unless `remote` already has the same SHA-256, then checks the digest
/// of what landed. Returns whether a copy happened.
pub(crate) async fn upload_verified<C: TransferChannel>(
    chan: &C,
    local: &Path,
    remote: &str,
    mode: u32,
) -> Result<bool> {
    let expected = local_sha256(local).await?;
    if chan.sha256(remote).await?.as_deref() == Some(expected.as_str()) {
        log::debug!("{remote} is up to date, skipping copy");
        return Ok(false);
    }
    upload_file(chan, local, remote, mode).await?;
    match chan.sha256(remote).await? {
        Some(actual) if actual == expected => Ok(true),
        actual => bail!(
            "checksum mismatch after copy: expected {expected}, got {}",
            actual.as_deref().unwrap_or("nothing")
        ),
    }
}
