// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Filesystem operations served to the orchestrator.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::batch::{BatchPolicy, BatchReport, run_batch};
use super::errors::{AppError, AppResult};

pub const DEFAULT_DIR_MODE: u32 = 0o755;

fn require(value: &str, what: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::invalid_argument(format!("{what} must not be empty")));
    }
    Ok(())
}

/// Creates `dir` with parents. A zero `mode` means [`DEFAULT_DIR_MODE`]. A leaf created
/// here gets `mode` regardless of the process umask; existing directories keep theirs.
pub async fn mkdir(dir: &str, mode: u32) -> AppResult<()> {
    require(dir, "dir")?;
    let mode = match mode & 0o7777 {
        0 => DEFAULT_DIR_MODE,
        bits => bits,
    };
    if fs::metadata(dir).await.is_ok_and(|meta| meta.is_dir()) {
        log::debug!("{dir} already exists, leaving its mode alone");
        return Ok(());
    }
    fs::DirBuilder::new()
        .recursive(true)
        .mode(mode)
        .create(dir)
        .await
        .map_err(|err| AppError::io("creating", dir, &err))?;
    fs::set_permissions(dir, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(|err| AppError::io("setting mode of", dir, &err))?;
    log::debug!("created {dir} with mode {mode:04o}");
    Ok(())
}

/// Copies each of `files` into `dir` under its base name. Stops at the first failure;
/// files copied before it stay in place.
pub async fn cp_files(files: &[String], dir: &str) -> AppResult<BatchReport> {
    require(dir, "dir")?;
    fs::DirBuilder::new()
        .recursive(true)
        .mode(DEFAULT_DIR_MODE)
        .create(dir)
        .await
        .map_err(|err| AppError::io("creating", dir, &err))?;
    run_batch(BatchPolicy::FailFast, files, |file| copy_into(file, dir)).await
}

async fn copy_into(file: &str, dir: &str) -> AppResult<()> {
    let name = Path::new(file)
        .file_name()
        .ok_or_else(|| AppError::invalid_argument(format!("{file} has no file name")))?;
    let dest = Path::new(dir).join(name);
    let dest_display = dest.display().to_string();

    let mut src = fs::File::open(file)
        .await
        .map_err(|err| AppError::io("opening", file, &err))?;
    let mut dst = fs::File::create(&dest)
        .await
        .map_err(|err| AppError::io("creating", &dest_display, &err))?;
    tokio::io::copy(&mut src, &mut dst)
        .await
        .map_err(|err| AppError::io("copying to", &dest_display, &err))?;
    dst.sync_all()
        .await
        .map_err(|err| AppError::io("syncing", &dest_display, &err))?;
    log::debug!("copied {file} to {dest_display}");
    Ok(())
}

/// Creates or truncates `file`, writes `content` and syncs it to disk.
pub async fn write_file(file: &str, content: &[u8]) -> AppResult<()> {
    require(file, "file")?;
    let mut f = fs::File::create(file)
        .await
        .map_err(|err| AppError::io("creating", file, &err))?;
    f.write_all(content)
        .await
        .map_err(|err| AppError::io("writing", file, &err))?;
    f.sync_all()
        .await
        .map_err(|err| AppError::io("syncing", file, &err))?;
    log::debug!("wrote {} bytes to {file}", content.len());
    Ok(())
}

/// Removes every path in `files`. Missing paths and removal failures are logged and
/// skipped; this never fails.
pub async fn rm_files(files: &[String]) -> BatchReport {
    let result = run_batch(BatchPolicy::BestEffort, files, |file| remove_path(file)).await;
    // BestEffort batches only ever return Ok.
    result.unwrap_or_default()
}

async fn remove_path(file: &str) -> AppResult<()> {
    let meta = match fs::symlink_metadata(file).await {
        Ok(meta) => meta,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            log::warn!("{file} does not exist, nothing to remove");
            return Ok(());
        }
        Err(err) => return Err(AppError::io("inspecting", file, &err)),
    };
    let removed = if meta.is_dir() {
        fs::remove_dir_all(file).await
    } else {
        fs::remove_file(file).await
    };
    removed.map_err(|err| AppError::io("removing", file, &err))?;
    log::debug!("removed {file}");
    Ok(())
}
