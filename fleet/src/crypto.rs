// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Result, bail};

/// Turns an encrypted password from the host inventory into the plain text handed to SSH.
pub trait PasswordDecryptor: Send + Sync {
    fn decrypt(&self, ciphertext: &str) -> Result<String>;
}

/// Used when no decryption service is wired in: encrypted passwords are rejected.
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectEncrypted;

impl PasswordDecryptor for RejectEncrypted {
    fn decrypt(&self, _ciphertext: &str) -> Result<String> {
        bail!("password is marked encrypted but no decryptor is configured")
    }
}

impl<F> PasswordDecryptor for F
where
    F: Fn(&str) -> Result<String> + Send + Sync,
{
    fn decrypt(&self, ciphertext: &str) -> Result<String> {
        self(ciphertext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_encrypted_always_fails() {
        assert!(RejectEncrypted.decrypt("abc").is_err());
    }

    #[test]
    fn closures_are_decryptors() {
        let reverse = |s: &str| -> Result<String> { Ok(s.chars().rev().collect()) };
        assert_eq!(reverse.decrypt("terces").unwrap(), "secret");
    }
}
