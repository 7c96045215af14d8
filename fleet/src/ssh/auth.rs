// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use russh::client::AuthResult;
use russh::keys::PrivateKeyWithHashAlg;
use thiserror::Error as ThisError;

use super::{ClientHandler, SshParams};

#[derive(Debug, ThisError)]
#[error("authentication_failure")]
pub struct AuthenticationFailure;

fn is_success(result: &AuthResult) -> bool {
    matches!(result, AuthResult::Success)
}

/// Tries the private key first when one is configured, then the password.
pub(super) async fn authenticate(
    handle: &mut russh::client::Handle<ClientHandler>,
    params: &SshParams,
) -> Result<()> {
    if params.identity_path.is_none() && params.password.is_none() {
        bail!("no credentials configured for {}", params.addr);
    }

    if let Some(path) = &params.identity_path {
        match russh::keys::load_secret_key(path, params.key_passphrase.as_deref()) {
            Ok(key) => {
                let pk = PrivateKeyWithHashAlg::new(
                    Arc::new(key),
                    handle.best_supported_rsa_hash().await?.flatten(),
                );
                let result = handle
                    .authenticate_publickey(params.username.clone(), pk)
                    .await
                    .context("publickey auth failed")?;
                if is_success(&result) {
                    return Ok(());
                }
                log::debug!("publickey rejected for {}@{}", params.username, params.addr);
            }
            Err(err) => {
                log::warn!("failed to load secret key at {}: {err}", path.display());
            }
        }
    }

    if let Some(password) = &params.password {
        let result = handle
            .authenticate_password(params.username.clone(), password.clone())
            .await
            .context("password auth failed")?;
        if is_success(&result) {
            return Ok(());
        }
    }

    Err(AuthenticationFailure.into())
}
