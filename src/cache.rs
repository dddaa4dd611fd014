//! Per-account instance cache
//!
//! Read-through/write-through over a [`CacheStore`]. Every store failure
//! degrades to a miss on read and to a no-op on write, so discovery stays
//! correct with the store gone.

use crate::error::CacheError;
use crate::mask::mask_account;
use crate::model::Instance;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Fixed time-to-live for cached result sets
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Key-value store backing the cache
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// `Ok(None)` on a miss
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;
}

struct StoredEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// In-process store with per-entry expiry
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, StoredEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| Instant::now() < e.expires_at)
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        entries.retain(|_, e| now < e.expires_at);
        entries.insert(
            key.to_string(),
            StoredEntry {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }
}

/// Store that is never reachable; caching switched off
pub struct DisabledStore;

#[async_trait]
impl CacheStore for DisabledStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Err(CacheError::Unavailable("cache disabled".to_string()))
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("cache disabled".to_string()))
    }
}

/// What a cached result set was fetched for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheScope {
    /// Sorted resource group names; empty means unfiltered
    pub resource_groups: Vec<String>,
    /// Sorted explicit regions, or `None` when every region was listed
    pub regions: Option<Vec<String>>,
}

impl CacheScope {
    pub fn new(resource_groups: &[String], regions: Option<&[String]>) -> Self {
        let mut resource_groups = resource_groups.to_vec();
        resource_groups.sort();
        let regions = regions.map(|r| {
            let mut r = r.to_vec();
            r.sort();
            r
        });
        Self {
            resource_groups,
            regions,
        }
    }

    /// Whether a set fetched for `self` can answer a request for `requested`
    pub fn covers(&self, requested: &CacheScope) -> bool {
        if self.resource_groups != requested.resource_groups {
            return false;
        }
        match (&self.regions, &requested.regions) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(have), Some(want)) => want.iter().all(|r| have.contains(r)),
        }
    }
}

/// Serialized cache payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResultSet {
    pub account: String,
    pub scope: CacheScope,
    pub cached_at: DateTime<Utc>,
    pub instances: Vec<Instance>,
}

/// Account-keyed cache of discovered instances
#[derive(Clone)]
pub struct InstanceCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl InstanceCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Cache backed by a [`DisabledStore`]
    pub fn disabled() -> Self {
        Self::new(Arc::new(DisabledStore), DEFAULT_TTL)
    }

    pub fn key(account: &str) -> String {
        format!("instances:{}", account)
    }

    /// Cached instances for `account` and whether they were a hit
    ///
    /// Absent, expired, undecodable, out-of-scope and unreachable all read
    /// as a miss.
    pub async fn get(&self, account: &str, scope: &CacheScope) -> (Vec<Instance>, bool) {
        let key = Self::key(account);

        let bytes = match self.store.get(&key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::info!("No cached instances for {}, fetching from API", mask_account(account));
                return (Vec::new(), false);
            }
            Err(e) => {
                tracing::warn!("Cache unavailable for {}, fetching from API: {}", mask_account(account), e);
                return (Vec::new(), false);
            }
        };

        let cached: CachedResultSet = match serde_json::from_slice(&bytes) {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!("Error decoding cached instances for {}: {}", mask_account(account), e);
                return (Vec::new(), false);
            }
        };

        if self.is_expired(cached.cached_at) {
            tracing::debug!("Cached instances for {} expired", mask_account(account));
            return (Vec::new(), false);
        }

        if cached.account != account || !cached.scope.covers(scope) {
            tracing::debug!("Cached instances for {} do not cover this request", mask_account(account));
            return (Vec::new(), false);
        }

        tracing::info!(
            "Retrieved {} instances for {} from cache",
            cached.instances.len(),
            mask_account(account)
        );
        (cached.instances, true)
    }

    /// Store instances for `account`. Failures are logged and swallowed.
    pub async fn put(&self, account: &str, scope: &CacheScope, instances: &[Instance]) {
        let payload = CachedResultSet {
            account: account.to_string(),
            scope: scope.clone(),
            cached_at: Utc::now(),
            instances: instances.to_vec(),
        };

        let bytes = match serde_json::to_vec(&payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Error encoding instances for cache: {}", e);
                return;
            }
        };

        match self.store.set(&Self::key(account), bytes, self.ttl).await {
            Ok(()) => tracing::info!(
                "Cached {} instances for {}",
                instances.len(),
                mask_account(account)
            ),
            Err(e) => tracing::warn!("Skipping cache write for {}: {}", mask_account(account), e),
        }
    }

    fn is_expired(&self, cached_at: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => Utc::now() >= cached_at + ttl,
            Err(_) => false,
        }
    }
}
