// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use anyhow::{Result, anyhow};

/// Very small, safe-ish shell escaper for paths.
pub(crate) fn sh_escape(p: &str) -> String {
    let mut out = String::from("'");
    out.push_str(&p.replace('\'', r"'\''"));
    out.push('\'');
    out
}

/// Every prefix directory of `remote_dir`, root first.
pub(crate) fn build_remote_dir_paths(remote_dir: &str) -> Vec<String> {
    let mut paths = Vec::new();
    let mut cur = String::from("");
    for comp in Path::new(remote_dir).components() {
        let seg = match comp {
            std::path::Component::RootDir => "/".to_string(),
            std::path::Component::Normal(os) => os.to_string_lossy().to_string(),
            _ => continue,
        };
        if seg.is_empty() || seg == "/" {
            continue;
        }
        if cur != "/" && !cur.is_empty() {
            cur = format!("{}/{}", cur.trim_end_matches('/'), seg);
        } else {
            cur = format!("/{}", seg);
        }
        paths.push(cur.clone());
    }
    paths
}

/// Formats permission bits the way the bulk-copy protocol expects them, e.g. `0644`.
pub fn format_mode(mode: u32) -> String {
    format!("{:04o}", mode & 0o7777)
}

/// Parses a symbolic mode string (`"0644"`, `"755"`) into permission bits.
pub fn parse_mode(mode: &str) -> Result<u32> {
    let trimmed = mode.trim();
    if trimmed.is_empty() || trimmed.len() > 4 {
        return Err(anyhow!("invalid file mode {mode:?}"));
    }
    let bits = u32::from_str_radix(trimmed, 8).map_err(|_| anyhow!("invalid file mode {mode:?}"))?;
    Ok(bits & 0o7777)
}

pub(crate) fn ensure_absolute(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(anyhow!("path must be absolute: {path}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sh_escape_wraps_and_escapes_quotes() {
        assert_eq!(sh_escape("/tmp/a b"), "'/tmp/a b'");
        assert_eq!(sh_escape("it's"), r"'it'\''s'");
    }

    #[test]
    fn build_remote_dir_paths_lists_prefixes() {
        assert_eq!(
            build_remote_dir_paths("/remote/deploy/app"),
            vec!["/remote", "/remote/deploy", "/remote/deploy/app"]
        );
        assert_eq!(build_remote_dir_paths("/"), Vec::<String>::new());
        assert_eq!(build_remote_dir_paths("/a/./b/"), vec!["/a", "/a/b"]);
    }

    #[test]
    fn format_mode_masks_file_type_bits() {
        assert_eq!(format_mode(0o100644), "0644");
        assert_eq!(format_mode(0o40755), "0755");
        assert_eq!(format_mode(0o4755), "4755");
    }

    #[test]
    fn parse_mode_accepts_octal() {
        assert_eq!(parse_mode("0644").unwrap(), 0o644);
        assert_eq!(parse_mode("755").unwrap(), 0o755);
        assert!(parse_mode("0x644").is_err());
        assert!(parse_mode("0999").is_err());
        assert!(parse_mode("").is_err());
        assert!(parse_mode("00644").is_err());
    }

    #[test]
    fn ensure_absolute_rejects_relative() {
        assert!(ensure_absolute("/etc/hosts").is_ok());
        assert!(ensure_absolute("etc/hosts").is_err());
    }
}
