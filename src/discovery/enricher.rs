//! Instance enrichment
//!
//! Joins raw instance records with floating IPs and tags.

use crate::cloud::types::{FloatingIp, FloatingIpTarget, RawInstance};
use crate::cloud::{CloudDirectory, Credential};
use crate::mask::mask_ip;
use crate::model::{DiscoveryRequest, Instance};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

/// Floating IP addresses keyed by network interface id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressMap(HashMap<String, String>);

impl AddressMap {
    pub fn from_floating_ips(floating_ips: Vec<FloatingIp>) -> Self {
        let mut map = HashMap::new();

        for fip in floating_ips {
            match fip.target {
                Some(FloatingIpTarget::NetworkInterface { id }) => {
                    tracing::debug!(
                        "Floating IP {} mapped to network interface {}",
                        mask_ip(&fip.address),
                        id
                    );
                    map.insert(id, fip.address);
                }
                Some(FloatingIpTarget::Other) => {
                    tracing::debug!(
                        "Floating IP {} is not attached to a network interface",
                        mask_ip(&fip.address)
                    );
                }
                None => {
                    tracing::debug!("Floating IP {} has no target", mask_ip(&fip.address));
                }
            }
        }

        Self(map)
    }

    pub fn get(&self, interface_id: &str) -> Option<&str> {
        self.0.get(interface_id).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Private address of the primary interface, falling back to the first
/// interface that has one. Unparsable addresses are dropped.
fn private_address(raw: &RawInstance) -> String {
    let candidate = raw
        .primary_network_interface
        .iter()
        .chain(raw.network_interfaces.iter())
        .find_map(|nic| nic.address());

    match candidate {
        Some(addr) if addr.parse::<IpAddr>().is_ok() => addr.to_string(),
        Some(_) => {
            tracing::warn!("Instance {} has an invalid private address, ignoring it", raw.name);
            String::new()
        }
        None => String::new(),
    }
}

/// Floating IP bound to the primary interface, else to any other interface
fn public_address(raw: &RawInstance, addresses: &AddressMap) -> String {
    raw.primary_network_interface
        .iter()
        .chain(raw.network_interfaces.iter())
        .find_map(|nic| addresses.get(&nic.id))
        .unwrap_or_default()
        .to_string()
}

/// Drop repeated tags, keeping the first occurrence's position
fn dedup_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.into_iter()
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}

/// Build an [`Instance`] from its raw record
///
/// Records without a CRN are skipped. A tag lookup failure only costs this
/// instance its tags.
pub async fn enrich(
    directory: &dyn CloudDirectory,
    credential: &Credential,
    unit: &DiscoveryRequest,
    raw: RawInstance,
    addresses: &AddressMap,
) -> Option<Instance> {
    if raw.crn.is_empty() {
        tracing::warn!("Instance {} ({}) has no CRN, skipping", raw.name, raw.id);
        return None;
    }

    let tags = match directory.list_tags(credential, &raw.crn).await {
        Ok(tags) => dedup_tags(tags),
        Err(e) => {
            tracing::warn!("Could not fetch tags for instance {}: {:#}", raw.name, e);
            Vec::new()
        }
    };

    let private_address = private_address(&raw);
    let public_address = public_address(&raw, addresses);
    if public_address.is_empty() {
        tracing::debug!("Instance {} in {} has no public IP", raw.name, unit.region);
    }

    Some(Instance {
        private_address,
        public_address,
        profile: raw.profile.map(|p| p.name).unwrap_or_default(),
        availability_zone: raw.zone.name,
        region: unit.region.clone(),
        account: unit.account.clone(),
        canonical_id: raw.crn,
        status: raw.status,
        name: raw.name,
        id: raw.id,
        tags,
    })
}

/// Enrich a whole walk, one instance at a time
pub async fn enrich_all(
    directory: &dyn CloudDirectory,
    credential: &Credential,
    unit: &DiscoveryRequest,
    raw: Vec<RawInstance>,
    addresses: &AddressMap,
) -> Vec<Instance> {
    let mut instances = Vec::with_capacity(raw.len());
    for record in raw {
        if let Some(instance) = enrich(directory, credential, unit, record, addresses).await {
            instances.push(instance);
        }
    }
    instances
}
