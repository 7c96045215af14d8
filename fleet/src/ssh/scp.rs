// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Minimal SCP (rcp) protocol, as spoken to a remote `scp -t` sink or `scp -f` source
//! over an exec channel stream.

use anyhow::{Context, Result, anyhow, bail};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::utils::format_mode;

const MAX_LINE: usize = 8192;

/// Header of a file announced by a remote `scp -f`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FileHeader {
    pub mode: u32,
    pub size: u64,
    pub name: String,
}

pub(crate) fn sink_command(remote_path: &str) -> String {
    format!("scp -t {}", super::utils::sh_escape(remote_path))
}

pub(crate) fn source_command(remote_path: &str) -> String {
    format!("scp -f {}", super::utils::sh_escape(remote_path))
}

/// Streams `size` bytes of `content` to a remote sink as file `name` with `mode`.
pub(crate) async fn send_file<S, R>(
    stream: &mut S,
    name: &str,
    mode: u32,
    size: u64,
    content: &mut R,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    read_ack(stream).await.context("waiting for remote scp")?;

    let header = format!("C{} {} {}\n", format_mode(mode), size, name);
    stream.write_all(header.as_bytes()).await?;
    stream.flush().await?;
    read_ack(stream).await.context("sending file header")?;

    let sent = tokio::io::copy(&mut content.take(size), stream).await?;
    if sent != size {
        bail!("source shrank during copy: expected {size} bytes, sent {sent}");
    }
    stream.write_all(&[0]).await?;
    stream.flush().await?;
    read_ack(stream).await.context("finishing file transfer")?;
    Ok(())
}

/// Pulls a single file from a remote source into `sink`.
pub(crate) async fn receive_file<S, W>(stream: &mut S, sink: &mut W) -> Result<FileHeader>
where
    S: AsyncRead + AsyncWrite + Unpin,
    W: AsyncWrite + Unpin,
{
    send_ok(stream).await?;
    let header = loop {
        let mut kind = [0u8; 1];
        stream
            .read_exact(&mut kind)
            .await
            .context("remote scp closed the channel")?;
        match kind[0] {
            b'C' => {
                let line = read_line(stream).await?;
                break parse_header(&line)?;
            }
            // Time record, only sent with -p.
            b'T' => {
                read_line(stream).await?;
                send_ok(stream).await?;
            }
            1 | 2 => {
                let message = read_line(stream).await?;
                bail!("scp: {}", message.trim_end());
            }
            b'D' => bail!("remote path is a directory"),
            other => bail!("unexpected scp record {other:#04x}"),
        }
    };
    send_ok(stream).await?;

    let received = tokio::io::copy(&mut (&mut *stream).take(header.size), sink).await?;
    if received != header.size {
        bail!(
            "remote file truncated: expected {} bytes, got {received}",
            header.size
        );
    }
    sink.flush().await?;
    read_ack(stream).await.context("finishing file transfer")?;
    send_ok(stream).await?;
    Ok(header)
}

pub(crate) fn parse_header(line: &str) -> Result<FileHeader> {
    let mut parts = line.trim_end_matches('\n').splitn(3, ' ');
    let mode = parts.next().ok_or_else(|| anyhow!("empty scp header"))?;
    let size = parts
        .next()
        .ok_or_else(|| anyhow!("scp header without size: {line:?}"))?;
    let name = parts
        .next()
        .ok_or_else(|| anyhow!("scp header without name: {line:?}"))?;
    Ok(FileHeader {
        mode: u32::from_str_radix(mode, 8).with_context(|| format!("bad mode in {line:?}"))?,
        size: size
            .parse()
            .with_context(|| format!("bad size in {line:?}"))?,
        name: name.to_string(),
    })
}

async fn send_ok<S: AsyncWrite + Unpin>(stream: &mut S) -> Result<()> {
    stream.write_all(&[0]).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_ack<S: AsyncRead + Unpin>(stream: &mut S) -> Result<()> {
    let mut code = [0u8; 1];
    stream
        .read_exact(&mut code)
        .await
        .context("remote scp closed the channel")?;
    match code[0] {
        0 => Ok(()),
        1 | 2 => {
            let message = read_line(stream).await?;
            bail!("scp: {}", message.trim_end())
        }
        other => bail!("unexpected scp response byte {other:#04x}"),
    }
}

pub(crate) async fn read_line<S: AsyncRead + Unpin>(stream: &mut S) -> Result<String> {
    let mut line = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        stream.read_exact(&mut byte).await?;
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
        if line.len() > MAX_LINE {
            bail!("scp control line too long");
        }
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}
