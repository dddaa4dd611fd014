//! VPC API payloads
//!
//! Only the fields discovery needs are modeled; everything else in the
//! responses is ignored.

use anyhow::{Context, Result};
use serde::Deserialize;

/// Pagination link as returned in `next`
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct PageLink {
    #[serde(default)]
    pub href: String,
}

impl PageLink {
    pub fn new(href: impl Into<String>) -> Self {
        Self { href: href.into() }
    }

    /// Extract the `start` token for the next request
    ///
    /// An empty href or a missing/empty `start` parameter means there are no
    /// more pages. An href that cannot be parsed is an error.
    pub fn start_token(&self) -> Result<Option<String>> {
        let href = self.href.trim();
        if href.is_empty() {
            return Ok(None);
        }

        let parsed = url::Url::parse(href)
            .with_context(|| format!("Invalid pagination link: {}", crate::mask::mask_url(href)))?;

        Ok(parsed
            .query_pairs()
            .find(|(k, _)| k == "start")
            .map(|(_, v)| v.into_owned())
            .filter(|v| !v.is_empty()))
    }
}

/// Reference carrying just a name (zones, profiles)
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct NameRef {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ReservedIp {
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct NetworkInterfaceRef {
    pub id: String,
    #[serde(default)]
    pub primary_ip: Option<ReservedIp>,
}

impl NetworkInterfaceRef {
    pub fn address(&self) -> Option<&str> {
        self.primary_ip
            .as_ref()
            .map(|ip| ip.address.as_str())
            .filter(|a| !a.is_empty())
    }
}

/// Instance record as listed by the VPC API, before enrichment
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct RawInstance {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub crn: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub zone: NameRef,
    #[serde(default)]
    pub profile: Option<NameRef>,
    #[serde(default)]
    pub primary_network_interface: Option<NetworkInterfaceRef>,
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterfaceRef>,
}

/// One page of `GET /instances`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstancePage {
    #[serde(default)]
    pub instances: Vec<RawInstance>,
    #[serde(default)]
    pub next: Option<PageLink>,
}

/// What a floating IP is bound to
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "resource_type")]
pub enum FloatingIpTarget {
    #[serde(rename = "network_interface")]
    NetworkInterface { id: String },
    /// Bare metal interfaces, virtual network interfaces, and anything newer
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FloatingIp {
    pub address: String,
    #[serde(default)]
    pub target: Option<FloatingIpTarget>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FloatingIpPage {
    #[serde(default)]
    pub floating_ips: Vec<FloatingIp>,
    #[serde(default)]
    pub next: Option<PageLink>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ResourceGroup {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceGroupList {
    #[serde(default)]
    pub resources: Vec<ResourceGroup>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegionList {
    #[serde(default)]
    pub regions: Vec<NameRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagList {
    /// Tags attached in total, across all pages
    pub total_count: Option<u64>,
    #[serde(default)]
    pub items: Vec<NameRef>,
}
