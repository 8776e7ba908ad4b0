use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use russh::client::Handle;
use russh::keys::agent::client::AgentClient;
use russh::keys::{load_secret_key, Algorithm, HashAlg, PrivateKeyWithHashAlg, PublicKey};

use crate::config::AuthMethod;

use super::session::{ConnectionParams, SshHandler};

/// Key files tried under `~/.ssh` when no identity is configured.
const DEFAULT_KEY_NAMES: &[&str] = &["id_ed25519", "id_rsa", "id_ecdsa"];

/// Authenticate with the deployment host using the configured method.
pub(super) async fn authenticate(
    session: &mut Handle<SshHandler>,
    params: &ConnectionParams,
) -> Result<()> {
    match params.auth_method {
        AuthMethod::Agent => try_agent_auth(session, &params.user).await,
        AuthMethod::Key => {
            let key_path = params
                .identity
                .as_ref()
                .ok_or_else(|| anyhow!("[host] auth = \"key\" requires an identity file"))?;
            if try_key_auth(session, &params.user, key_path).await {
                Ok(())
            } else {
                Err(anyhow!(
                    "Key authentication as '{}' failed with {}",
                    params.user,
                    key_path.display()
                ))
            }
        }
        AuthMethod::Auto => authenticate_auto(session, params).await,
    }
}

/// Auto: configured identity first, then the agent, then default keys.
async fn authenticate_auto(
    session: &mut Handle<SshHandler>,
    params: &ConnectionParams,
) -> Result<()> {
    let mut tried = Vec::new();

    if let Some(key_path) = &params.identity {
        if try_key_auth(session, &params.user, key_path).await {
            return Ok(());
        }
        tried.push(key_path.display().to_string());
    }

    match try_agent_auth(session, &params.user).await {
        Ok(()) => return Ok(()),
        Err(e) => {
            tracing::debug!("Agent auth failed: {}", e);
            tried.push("ssh-agent".to_string());
        }
    }

    for key_path in default_keys() {
        if try_key_auth(session, &params.user, &key_path).await {
            return Ok(());
        }
        tried.push(key_path.display().to_string());
    }

    Err(anyhow!(
        "Authentication as '{}' failed. Tried: {}",
        params.user,
        tried.join(", ")
    ))
}

fn default_keys() -> Vec<PathBuf> {
    let Some(ssh_dir) = dirs::home_dir().map(|h| h.join(".ssh")) else {
        return Vec::new();
    };
    DEFAULT_KEY_NAMES
        .iter()
        .map(|name| ssh_dir.join(name))
        .filter(|p| p.exists())
        .collect()
}

/// Pick the RSA signature hash for `key`; `None` for non-RSA keys.
async fn rsa_hash_for_key(session: &mut Handle<SshHandler>, key: &PublicKey) -> Option<HashAlg> {
    if !matches!(key.algorithm(), Algorithm::Rsa { .. }) {
        return None;
    }

    match session.best_supported_rsa_hash().await {
        Ok(Some(hash_alg)) => hash_alg,
        Ok(None) => Some(HashAlg::Sha256),
        Err(e) => {
            tracing::debug!("Failed to query server RSA hash support: {}", e);
            Some(HashAlg::Sha256)
        }
    }
}

async fn try_agent_auth(session: &mut Handle<SshHandler>, user: &str) -> Result<()> {
    let mut agent = AgentClient::connect_env()
        .await
        .context("Failed to connect to SSH agent (is SSH_AUTH_SOCK set?)")?;

    let identities = agent
        .request_identities()
        .await
        .context("Failed to list keys from SSH agent")?;

    if identities.is_empty() {
        return Err(anyhow!("SSH agent has no keys"));
    }

    for key in &identities {
        let hash_alg = rsa_hash_for_key(session, key).await;
        match session
            .authenticate_publickey_with(user, key.clone(), hash_alg, &mut agent)
            .await
        {
            Ok(result) if result.success() => {
                tracing::debug!("Authenticated via SSH agent ({:?})", key.algorithm());
                return Ok(());
            }
            Ok(_) => tracing::debug!("Agent key {:?} rejected", key.algorithm()),
            Err(e) => tracing::debug!("Agent key {:?} error: {}", key.algorithm(), e),
        }
    }

    Err(anyhow!(
        "SSH agent has {} key(s) but none were accepted",
        identities.len()
    ))
}

/// Try a single key file. Unreadable keys count as a rejection.
async fn try_key_auth(session: &mut Handle<SshHandler>, user: &str, key_path: &Path) -> bool {
    let key = match load_secret_key(key_path, None) {
        Ok(k) => k,
        Err(e) => {
            tracing::debug!("Failed to load key {}: {}", key_path.display(), e);
            return false;
        }
    };

    let hash_alg = rsa_hash_for_key(session, key.public_key()).await;
    let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg);

    match session.authenticate_publickey(user, key_with_alg).await {
        Ok(result) if result.success() => {
            tracing::debug!("Authenticated with {}", key_path.display());
            true
        }
        Ok(_) => {
            tracing::debug!("Key {} rejected", key_path.display());
            false
        }
        Err(e) => {
            tracing::debug!("Key auth error for {}: {}", key_path.display(), e);
            false
        }
    }
}
