//! In-process collaborators for driving the discovery pipeline in tests

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vpcsd::cache::{CacheStore, InstanceCache};
use vpcsd::cloud::types::{
    FloatingIp, FloatingIpTarget, InstancePage, NameRef, NetworkInterfaceRef, PageLink, RawInstance,
    ReservedIp, ResourceGroup,
};
use vpcsd::cloud::{CloudDirectory, Credential, CredentialProvider};
use vpcsd::discovery::{Discoverer, DiscoveryOptions, RegionMode};
use vpcsd::error::{CacheError, DiscoveryError};

/// Build a raw instance with one primary interface
pub fn raw_instance(id: &str, nic_id: &str, private_ip: &str) -> RawInstance {
    let nic = NetworkInterfaceRef {
        id: nic_id.to_string(),
        primary_ip: Some(ReservedIp {
            address: private_ip.to_string(),
        }),
    };
    RawInstance {
        id: id.to_string(),
        name: format!("vm-{}", id),
        crn: format!("crn:v1:bluemix:public:is::a/123::instance:{}", id),
        status: "running".to_string(),
        zone: NameRef {
            name: "us-east-1".to_string(),
        },
        profile: Some(NameRef {
            name: "bx2-2x8".to_string(),
        }),
        primary_network_interface: Some(nic.clone()),
        network_interfaces: vec![nic],
    }
}

pub fn attached(address: &str, nic_id: &str) -> FloatingIp {
    FloatingIp {
        address: address.to_string(),
        target: Some(FloatingIpTarget::NetworkInterface {
            id: nic_id.to_string(),
        }),
    }
}

pub fn next_link(start: &str) -> Option<PageLink> {
    Some(PageLink::new(format!(
        "https://us-east.iaas.cloud.ibm.com/v1/instances?limit=100&start={}",
        start
    )))
}

type PageKey = (String, Option<String>, Option<String>);

/// Scriptable directory that counts every call
#[derive(Default)]
pub struct FakeDirectory {
    pub regions: Vec<String>,
    pub groups: Vec<ResourceGroup>,
    pages: HashMap<PageKey, InstancePage>,
    floating_ips: HashMap<String, Vec<FloatingIp>>,
    tags: HashMap<String, Vec<String>>,
    failing_tags: HashSet<String>,
    failing_regions: HashSet<String>,
    fail_region_listing: bool,
    floating_ip_failures: usize,
    latency: Option<Duration>,

    pub region_calls: AtomicUsize,
    pub group_calls: AtomicUsize,
    pub instance_calls: AtomicUsize,
    pub tag_calls: AtomicUsize,
    pub floating_ip_calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub seen_starts: Mutex<Vec<Option<String>>>,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_regions(mut self, regions: &[&str]) -> Self {
        self.regions = regions.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn with_group(mut self, name: &str, id: &str) -> Self {
        self.groups.push(ResourceGroup {
            id: id.to_string(),
            name: name.to_string(),
        });
        self
    }

    /// Page returned for `(region, group id, start token)`
    pub fn with_page(
        mut self,
        region: &str,
        group_id: Option<&str>,
        start: Option<&str>,
        instances: Vec<RawInstance>,
        next: Option<PageLink>,
    ) -> Self {
        self.pages.insert(
            (
                region.to_string(),
                group_id.map(String::from),
                start.map(String::from),
            ),
            InstancePage { instances, next },
        );
        self
    }

    pub fn with_floating_ips(mut self, region: &str, ips: Vec<FloatingIp>) -> Self {
        self.floating_ips.insert(region.to_string(), ips);
        self
    }

    pub fn with_tags(mut self, crn: &str, tags: &[&str]) -> Self {
        self.tags
            .insert(crn.to_string(), tags.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn failing_tags_for(mut self, crn: &str) -> Self {
        self.failing_tags.insert(crn.to_string());
        self
    }

    pub fn failing_region(mut self, region: &str) -> Self {
        self.failing_regions.insert(region.to_string());
        self
    }

    pub fn failing_region_listing(mut self) -> Self {
        self.fail_region_listing = true;
        self
    }

    /// The first `times` floating IP listings fail
    pub fn failing_floating_ips(mut self, times: usize) -> Self {
        self.floating_ip_failures = times;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CloudDirectory for FakeDirectory {
    async fn list_regions(&self, _credential: &Credential) -> Result<Vec<String>> {
        self.region_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_region_listing {
            return Err(anyhow::anyhow!("API request failed: 503 Service Unavailable"));
        }
        Ok(self.regions.clone())
    }

    async fn list_resource_groups(&self, _credential: &Credential) -> Result<Vec<ResourceGroup>> {
        self.group_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.groups.clone())
    }

    async fn list_instances(
        &self,
        _credential: &Credential,
        region: &str,
        resource_group_id: Option<&str>,
        start: Option<&str>,
    ) -> Result<InstancePage> {
        self.instance_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_starts
            .lock()
            .unwrap()
            .push(start.map(String::from));

        let _guard = InFlight::enter(&self.in_flight, &self.max_in_flight);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if self.failing_regions.contains(region) {
            return Err(anyhow::anyhow!("API request failed: 500 Internal Server Error"));
        }

        let key = (
            region.to_string(),
            resource_group_id.map(String::from),
            start.map(String::from),
        );
        Ok(self.pages.get(&key).cloned().unwrap_or_default())
    }

    async fn list_floating_ips(&self, _credential: &Credential, region: &str) -> Result<Vec<FloatingIp>> {
        let call = self.floating_ip_calls.fetch_add(1, Ordering::SeqCst);
        if call < self.floating_ip_failures {
            return Err(anyhow::anyhow!("API request failed: 503 Service Unavailable"));
        }
        Ok(self.floating_ips.get(region).cloned().unwrap_or_default())
    }

    async fn list_tags(&self, _credential: &Credential, crn: &str) -> Result<Vec<String>> {
        self.tag_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_tags.contains(crn) {
            return Err(anyhow::anyhow!("API request failed: 500 Internal Server Error"));
        }
        Ok(self.tags.get(crn).cloned().unwrap_or_default())
    }
}

/// Counts a call as in flight until dropped, including when the calling
/// task is aborted mid-call
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(current: &'a AtomicUsize, max: &AtomicUsize) -> Self {
        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
        max.fetch_max(now, Ordering::SeqCst);
        Self(current)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Knows a fixed set of accounts
pub struct StaticCredentials(pub HashSet<String>);

impl StaticCredentials {
    pub fn for_accounts(accounts: &[&str]) -> Self {
        Self(accounts.iter().map(|a| a.to_string()).collect())
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn credential(&self, account: &str) -> std::result::Result<Credential, DiscoveryError> {
        if self.0.contains(account) {
            Ok(Credential::new(format!("key-{}", account)))
        } else {
            Err(DiscoveryError::CredentialNotFound {
                account: account.to_string(),
            })
        }
    }
}

/// Store whose backend is always down; counts attempts
#[derive(Default)]
pub struct UnreachableStore {
    pub gets: AtomicUsize,
    pub sets: AtomicUsize,
}

#[async_trait]
impl CacheStore for UnreachableStore {
    async fn get(&self, _key: &str) -> std::result::Result<Option<Vec<u8>>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> std::result::Result<(), CacheError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
}

pub fn discoverer(
    directory: Arc<FakeDirectory>,
    accounts: &[&str],
    cache: InstanceCache,
    region_mode: RegionMode,
    max_concurrency: usize,
) -> Discoverer {
    Discoverer::new(
        directory,
        Arc::new(StaticCredentials::for_accounts(accounts)),
        cache,
        DiscoveryOptions {
            max_concurrency,
            region_mode,
        },
    )
}
