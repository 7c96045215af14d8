// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;

/// Operating system and CPU architecture of a host, in container image naming
/// (`linux/amd64`, `linux/arm/v7`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
    pub variant: Option<String>,
}

impl Platform {
    /// Parses the output of `uname -s -m`.
    pub fn from_uname(output: &str) -> Option<Self> {
        let mut fields = output.split_whitespace();
        let os = fields.next()?.to_ascii_lowercase();
        let machine = fields.next()?.to_ascii_lowercase();
        let (architecture, variant) = match machine.as_str() {
            "x86_64" | "amd64" => ("amd64", None),
            "aarch64" | "arm64" => ("arm64", Some("v8")),
            "armv7l" | "armv7" => ("arm", Some("v7")),
            "armv6l" | "armv6" => ("arm", Some("v6")),
            "i386" | "i486" | "i586" | "i686" => ("386", None),
            other => (other, None),
        };
        Some(Self {
            os,
            architecture: architecture.to_string(),
            variant: variant.map(str::to_string),
        })
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{variant}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_kernel_machine_names() {
        let cases = [
            ("Linux x86_64\n", "linux/amd64"),
            ("Linux aarch64\n", "linux/arm64/v8"),
            ("Linux armv7l\n", "linux/arm/v7"),
            ("Linux i686\n", "linux/386"),
            ("Linux ppc64le\n", "linux/ppc64le"),
            ("Darwin arm64\n", "darwin/arm64/v8"),
        ];
        for (uname, expected) in cases {
            let platform = Platform::from_uname(uname).unwrap();
            assert_eq!(platform.to_string(), expected, "{uname:?}");
        }
    }

    #[test]
    fn rejects_incomplete_output() {
        assert_eq!(Platform::from_uname(""), None);
        assert_eq!(Platform::from_uname("Linux\n"), None);
    }
}
