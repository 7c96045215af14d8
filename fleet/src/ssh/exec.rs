// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use russh::ChannelMsg;
use russh::client::Handle;

use super::{ClientHandler, Transport};

/// Captured result of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Output of both streams in arrival order.
    pub combined: Vec<u8>,
    /// `None` when the command was killed by a signal or the channel closed early.
    pub exit_code: Option<u32>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    fn record_stdout(&mut self, data: &[u8]) {
        self.stdout.extend_from_slice(data);
        self.combined.extend_from_slice(data);
    }

    fn record_stderr(&mut self, data: &[u8]) {
        self.stderr.extend_from_slice(data);
        self.combined.extend_from_slice(data);
    }
}

fn handle_capture_message(msg: &ChannelMsg, out: &mut ExecOutput) -> bool {
    match msg {
        ChannelMsg::Data { data } => {
            out.record_stdout(data);
            false
        }
        ChannelMsg::ExtendedData { data, ext: 1 } => {
            out.record_stderr(data);
            false
        }
        ChannelMsg::ExitStatus { exit_status } => {
            out.exit_code = Some(*exit_status);
            false
        }
        ChannelMsg::ExitSignal { signal_name, .. } => {
            log::debug!("remote command terminated by signal {signal_name:?}");
            false
        }
        ChannelMsg::Close => true,
        _ => false,
    }
}

/// Splits a byte stream into lines, keeping an incomplete tail until more data arrives.
#[derive(Debug, Default)]
pub(crate) struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub(crate) fn push(&mut self, data: &[u8], mut on_line: impl FnMut(&str)) {
        self.pending.extend_from_slice(data);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..pos]);
            on_line(text.trim_end_matches('\r'));
        }
    }

    pub(crate) fn finish(&mut self, mut on_line: impl FnMut(&str)) {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            on_line(String::from_utf8_lossy(&rest).trim_end_matches('\r'));
        }
    }
}

pub(super) async fn capture_on(handle: &Handle<ClientHandler>, cmd: &str) -> Result<ExecOutput> {
    let mut chan = handle.channel_open_session().await.context("open session")?;
    log::debug!("executing '{}'", cmd);
    chan.exec(true, cmd).await.context("exec request")?;
    let mut out = ExecOutput::default();
    while let Some(msg) = chan.wait().await {
        if handle_capture_message(&msg, &mut out) {
            break;
        }
    }
    let _ = chan.close().await;
    Ok(out)
}

impl Transport {
    /// Execute command over SSH, retrieving stdout, stderr and exit code.
    pub(crate) async fn exec_capture(&self, cmd: &str) -> Result<ExecOutput> {
        capture_on(&self.handle, cmd).await
    }

    /// Runs `cmd`, handing every line of either stream to `on_line` as it arrives.
    /// Returns the exit code; `None` when the command ended without one.
    pub(crate) async fn exec_streaming(
        &self,
        cmd: &str,
        mut on_line: impl FnMut(&str) + Send,
    ) -> Result<Option<u32>> {
        let mut chan = self
            .handle
            .channel_open_session()
            .await
            .context("open session")?;
        log::debug!("streaming '{}'", cmd);
        chan.exec(true, cmd).await.context("exec request")?;
        let (mut stdout, mut stderr) = (LineSplitter::default(), LineSplitter::default());
        let mut exit_code = None;
        while let Some(msg) = chan.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.push(data, &mut on_line),
                ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.push(data, &mut on_line),
                ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status),
                ChannelMsg::Close => break,
                _ => {}
            }
        }
        stdout.finish(&mut on_line);
        stderr.finish(&mut on_line);
        let _ = chan.close().await;
        Ok(exit_code)
    }
}
