//! API key lookup
//!
//! Keys are looked up in the environment first, then in the config file,
//! then in Vault.

use super::http::CloudHttpClient;
use super::{Credential, CredentialProvider};
use crate::error::DiscoveryError;
use crate::mask::mask_account;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Prefix of per-account environment variables
pub const API_KEY_ENV_PREFIX: &str = "IBMCLOUD_API_KEY_";

/// Vault KV-v2 location of API keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub address: String,
    /// Falls back to `VAULT_TOKEN` when unset
    pub token: Option<String>,
    pub path_prefix: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8200".to_string(),
            token: None,
            path_prefix: "secret/data/ibmcloud".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct VaultSecret {
    data: VaultData,
}

#[derive(Debug, Deserialize)]
struct VaultData {
    data: HashMap<String, serde_json::Value>,
}

/// Environment variable holding the key for `account`
pub fn env_var_name(account: &str) -> String {
    let suffix: String = account
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{}{}", API_KEY_ENV_PREFIX, suffix)
}

struct VaultSource {
    http: CloudHttpClient,
    config: VaultConfig,
    token: String,
}

impl VaultSource {
    async fn read(&self, account: &str) -> Result<Option<String>> {
        let url = format!(
            "{}/v1/{}/{}",
            self.config.address.trim_end_matches('/'),
            self.config.path_prefix.trim_matches('/'),
            urlencoding::encode(account)
        );

        let secret: VaultSecret = self
            .http
            .get_json_with_header(&url, "X-Vault-Token", &self.token)
            .await
            .context("Failed to read secret from Vault")?;

        Ok(secret
            .data
            .data
            .get("api_key")
            .and_then(|v| v.as_str())
            .filter(|k| !k.is_empty())
            .map(|k| k.to_string()))
    }
}

/// Environment -> config file -> Vault
pub struct CredentialChain {
    configured: HashMap<String, String>,
    vault: Option<VaultSource>,
}

impl CredentialChain {
    /// `configured` maps account keys to inline API keys from the config file.
    /// Vault is consulted when configured or when `VAULT_TOKEN` is set.
    pub fn new(
        http: CloudHttpClient,
        configured: HashMap<String, String>,
        vault: Option<VaultConfig>,
    ) -> Self {
        let env_token = std::env::var("VAULT_TOKEN").ok().filter(|t| !t.is_empty());

        let vault = match (vault, env_token) {
            (Some(config), env_token) => {
                let token = config.token.clone().or(env_token);
                match token {
                    Some(token) => Some(VaultSource { http, config, token }),
                    None => {
                        tracing::warn!("Vault configured without a token, skipping Vault lookups");
                        None
                    }
                }
            }
            (None, Some(token)) => Some(VaultSource {
                http,
                config: VaultConfig::default(),
                token,
            }),
            (None, None) => None,
        };

        Self { configured, vault }
    }

    fn from_env(account: &str) -> Option<String> {
        std::env::var(env_var_name(account))
            .ok()
            .filter(|k| !k.is_empty())
    }

    fn from_config(&self, account: &str) -> Option<String> {
        self.configured
            .get(account)
            .filter(|k| !k.is_empty())
            .cloned()
    }
}

#[async_trait]
impl CredentialProvider for CredentialChain {
    async fn credential(&self, account: &str) -> std::result::Result<Credential, DiscoveryError> {
        if let Some(key) = Self::from_env(account) {
            tracing::debug!("API key for {} taken from environment", mask_account(account));
            return Ok(Credential::new(key));
        }

        if let Some(key) = self.from_config(account) {
            tracing::debug!("API key for {} taken from config file", mask_account(account));
            return Ok(Credential::new(key));
        }

        if let Some(vault) = &self.vault {
            match vault.read(account).await {
                Ok(Some(key)) => {
                    tracing::debug!("API key for {} taken from Vault", mask_account(account));
                    return Ok(Credential::new(key));
                }
                Ok(None) => {
                    tracing::debug!("Vault secret for {} has no api_key", mask_account(account));
                }
                Err(e) => {
                    tracing::warn!("Vault lookup for {} failed: {:#}", mask_account(account), e);
                }
            }
        }

        Err(DiscoveryError::CredentialNotFound {
            account: account.to_string(),
        })
    }
}
