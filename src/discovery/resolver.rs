//! Resource group name resolution
//!
//! Names are resolved to ids once and memoized for the lifetime of the
//! index. Concurrent first lookups of the same name share one directory call.

use crate::cloud::{CloudDirectory, Credential};
use crate::error::DiscoveryError;
use crate::mask::mask_account;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Memo of `(account, group name) -> group id`
///
/// Group names are only unique within an account, so the account is part of
/// the key. Entries are never invalidated; share one index per process or
/// create one per discovery run when staleness matters.
#[derive(Default)]
pub struct ResourceGroupIndex {
    entries: DashMap<(String, String), Arc<OnceCell<String>>>,
}

impl ResourceGroupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `name` to its id, querying the directory on first use
    ///
    /// Failures are not memoized and not retried here.
    pub async fn resolve(
        &self,
        directory: &dyn CloudDirectory,
        credential: &Credential,
        account: &str,
        name: &str,
    ) -> Result<String, DiscoveryError> {
        let cell = self
            .entries
            .entry((account.to_string(), name.to_string()))
            .or_default()
            .clone();

        if let Some(id) = cell.get() {
            tracing::debug!("Resource group '{}' resolved to cached ID '{}'", name, id);
            return Ok(id.clone());
        }

        let id = cell
            .get_or_try_init(|| lookup(directory, credential, account, name))
            .await?;

        Ok(id.clone())
    }

    /// Number of memoized names
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.value().initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn lookup(
    directory: &dyn CloudDirectory,
    credential: &Credential,
    account: &str,
    name: &str,
) -> Result<String, DiscoveryError> {
    tracing::debug!(
        "Resolving resource group '{}' for account {}",
        name,
        mask_account(account)
    );

    let groups = directory
        .list_resource_groups(credential)
        .await
        .map_err(DiscoveryError::DirectoryUnavailable)?;

    match groups.into_iter().find(|g| g.name == name) {
        Some(group) => {
            tracing::info!("Resource group '{}' resolved to ID '{}'", name, group.id);
            Ok(group.id)
        }
        None => {
            tracing::warn!("Resource group '{}' not found", name);
            Err(DiscoveryError::NotFound {
                name: name.to_string(),
            })
        }
    }
}
