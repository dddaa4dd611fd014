//! Paginated instance walker
//!
//! Drives the cursor-based listing protocol for one (account, region,
//! resource group) tuple until no continuation token is left.

use super::enricher::AddressMap;
use crate::cloud::types::RawInstance;
use crate::cloud::{CloudDirectory, Credential};
use crate::error::DiscoveryError;
use crate::mask::{mask_account, mask_token};

/// Everything listed for one tuple, ready for enrichment
#[derive(Debug, Default)]
pub struct Walk {
    pub instances: Vec<RawInstance>,
    pub addresses: AddressMap,
    /// Number of list calls issued
    pub pages: usize,
    /// Why public addresses could not be looked up, when they could not
    pub addresses_error: Option<String>,
}

/// List every instance in `region`, optionally filtered to a resource group id
///
/// A failed page or a malformed continuation link aborts the walk with
/// [`DiscoveryError::PartialFetch`]; truncated results are never returned.
/// A floating IP lookup failure keeps the instances but leaves public
/// addresses empty and marks the walk degraded.
pub async fn walk(
    directory: &dyn CloudDirectory,
    credential: &Credential,
    account: &str,
    region: &str,
    resource_group_id: Option<&str>,
) -> Result<Walk, DiscoveryError> {
    let partial = |source: anyhow::Error| DiscoveryError::PartialFetch {
        account: account.to_string(),
        region: region.to_string(),
        source,
    };

    let (addresses, addresses_error) = match directory.list_floating_ips(credential, region).await {
        Ok(floating_ips) => (AddressMap::from_floating_ips(floating_ips), None),
        Err(e) => {
            tracing::warn!("Could not fetch floating IPs for {}: {:#}", region, e);
            (
                AddressMap::default(),
                Some(format!("floating IPs unavailable in {}: {:#}", region, e)),
            )
        }
    };

    let mut instances = Vec::new();
    let mut pages = 0;
    let mut start: Option<String> = None;

    loop {
        let page = directory
            .list_instances(credential, region, resource_group_id, start.as_deref())
            .await
            .map_err(partial)?;
        pages += 1;
        instances.extend(page.instances);

        let next = match page.next {
            Some(link) => link.start_token().map_err(partial)?,
            None => None,
        };

        match next {
            None => break,
            Some(token) if start.as_deref() == Some(token.as_str()) => {
                return Err(partial(anyhow::anyhow!(
                    "pagination token {} did not advance",
                    mask_token(&token)
                )));
            }
            Some(token) => {
                tracing::debug!("Next pagination token for {}: {}", region, mask_token(&token));
                start = Some(token);
            }
        }
    }

    tracing::debug!(
        "Listed {} instances for {} in {} over {} pages",
        instances.len(),
        mask_account(account),
        region,
        pages
    );

    Ok(Walk {
        instances,
        addresses,
        pages,
        addresses_error,
    })
}
