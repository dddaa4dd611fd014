//! IAM Authentication
//!
//! Exchanges account API keys for short-lived bearer tokens and caches them
//! per key until shortly before they expire.

use super::http::CloudHttpClient;
use super::Credential;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Grant type for API key exchange
const APIKEY_GRANT_TYPE: &str = "urn:ibm:params:oauth:grant-type:apikey";

/// Refresh tokens this much before they actually expire
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// TTL used when IAM omits `expires_in`
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(20 * 60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    /// When this token expires (with buffer applied)
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Token source with one cached token per API key
#[derive(Clone)]
pub struct IamTokenSource {
    http: CloudHttpClient,
    token_url: String,
    token_cache: Arc<RwLock<HashMap<String, CachedToken>>>,
}

impl IamTokenSource {
    pub fn new(http: CloudHttpClient, token_url: impl Into<String>) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            token_cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get a bearer token for the credential, reusing a cached one while valid
    pub async fn get_token(&self, credential: &Credential) -> Result<String> {
        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.get(credential.expose()) {
                if cached.is_valid() {
                    return Ok(cached.token.clone());
                }
                tracing::debug!("Cached token expired, fetching new token");
            }
        }

        let response: TokenResponse = self
            .http
            .post_form(
                &self.token_url,
                &[("grant_type", APIKEY_GRANT_TYPE), ("apikey", credential.expose())],
            )
            .await
            .context("Failed to exchange API key for an IAM token")?;

        let ttl = response
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_TTL);
        let expires_at = Instant::now() + ttl.saturating_sub(TOKEN_EXPIRY_BUFFER);

        {
            let mut cache = self.token_cache.write().await;
            cache.insert(
                credential.expose().to_string(),
                CachedToken {
                    token: response.access_token.clone(),
                    expires_at,
                },
            );
        }

        tracing::debug!(
            "New token cached, expires in ~{} minutes",
            ttl.saturating_sub(TOKEN_EXPIRY_BUFFER).as_secs() / 60
        );

        Ok(response.access_token)
    }

    /// Drop the cached token for this credential
    pub async fn invalidate(&self, credential: &Credential) {
        let mut cache = self.token_cache.write().await;
        cache.remove(credential.expose());
    }
}
