//! Discovery domain types

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// One discovered compute instance
///
/// Built once during enrichment and never mutated afterwards. Two values with
/// the same `canonical_id` are the same entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    pub id: String,
    pub region: String,
    /// Logical account key, never the credential
    pub account: String,
    pub status: String,
    pub availability_zone: String,
    /// Globally unique resource name (CRN)
    pub canonical_id: String,
    #[serde(default)]
    pub private_address: String,
    /// Empty when no floating IP is bound
    #[serde(default)]
    pub public_address: String,
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Instance {
    /// Address a scraper should target: private first, public as fallback
    pub fn primary_address(&self) -> Option<&str> {
        [self.private_address.as_str(), self.public_address.as_str()]
            .into_iter()
            .find(|a| !a.is_empty())
    }
}

/// What the caller asked for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryScope {
    pub accounts: Vec<String>,
    pub regions: Vec<String>,
    /// Empty means no resource group filter
    pub resource_groups: Vec<String>,
}

impl DiscoveryScope {
    pub fn new(accounts: Vec<String>, regions: Vec<String>, resource_groups: Vec<String>) -> Self {
        Self {
            accounts: normalize_list(accounts),
            regions: normalize_list(regions),
            resource_groups: normalize_list(resource_groups),
        }
    }

    pub fn wants_region(&self, region: &str) -> bool {
        self.regions.iter().any(|r| r == region)
    }

    /// Resource group filters to fan out over; `None` is the unfiltered listing
    pub fn group_filters(&self) -> Vec<Option<String>> {
        if self.resource_groups.is_empty() {
            vec![None]
        } else {
            self.resource_groups.iter().cloned().map(Some).collect()
        }
    }
}

/// Trim entries, drop blanks and duplicates, keep first-seen order
fn normalize_list(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && seen.insert(v.clone()))
        .collect()
}

/// A single unit of fan-out work
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiscoveryRequest {
    pub account: String,
    pub region: String,
    pub resource_group: Option<String>,
}

impl fmt::Display for DiscoveryRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            crate::mask::mask_account(&self.account),
            self.region,
            self.resource_group.as_deref().unwrap_or("*")
        )
    }
}

/// Something that contributed nothing to the aggregate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    pub account: String,
    /// `None` when the failure happened before fan-out (credential, region listing)
    pub region: Option<String>,
    pub resource_group: Option<String>,
    pub reason: String,
}

impl UnitFailure {
    pub fn for_account(account: &str, reason: impl Into<String>) -> Self {
        Self {
            account: account.to_string(),
            region: None,
            resource_group: None,
            reason: reason.into(),
        }
    }

    pub fn for_unit(unit: &DiscoveryRequest, reason: impl Into<String>) -> Self {
        Self {
            account: unit.account.clone(),
            region: Some(unit.region.clone()),
            resource_group: unit.resource_group.clone(),
            reason: reason.into(),
        }
    }
}

/// Aggregated result of one discovery pass
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    pub instances: Vec<Instance>,
    pub failures: Vec<UnitFailure>,
}

impl Discovery {
    /// True when at least one unit failed, so `instances` may be incomplete
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}
