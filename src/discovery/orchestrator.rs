//! Fetch orchestration
//!
//! Fans discovery out over accounts × regions × resource groups under a
//! fixed concurrency budget and fans the results back in. A failing unit is
//! recorded and contributes nothing; it never cancels its siblings. A unit
//! that only lost its floating IPs keeps its instances and is still recorded.
//! Dropping a pass cancels all of its outstanding units.

use super::enricher::enrich_all;
use super::resolver::ResourceGroupIndex;
use super::walker::walk;
use crate::cache::{CacheScope, InstanceCache};
use crate::cloud::{CloudDirectory, Credential, CredentialProvider};
use crate::error::DiscoveryError;
use crate::mask::mask_account;
use crate::model::{Discovery, DiscoveryRequest, DiscoveryScope, Instance, UnitFailure};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;

/// Default cap on simultaneously running units
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Where the region list comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionMode {
    /// Ask the directory for every region of each account, then narrow to
    /// the requested ones
    Discover,
    /// Only visit the requested regions
    Explicit,
}

#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub max_concurrency: usize,
    pub region_mode: RegionMode,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            region_mode: RegionMode::Discover,
        }
    }
}

/// Shared pieces each worker needs
#[derive(Clone)]
struct Pipeline {
    directory: Arc<dyn CloudDirectory>,
    groups: Arc<ResourceGroupIndex>,
}

impl Pipeline {
    /// Resolver -> walker -> enricher for one unit
    async fn run(&self, credential: &Credential, unit: &DiscoveryRequest) -> Result<UnitOutput, DiscoveryError> {
        let directory = self.directory.as_ref();

        let group_id = match &unit.resource_group {
            Some(name) => Some(
                self.groups
                    .resolve(directory, credential, &unit.account, name)
                    .await?,
            ),
            None => None,
        };

        let walked = walk(
            directory,
            credential,
            &unit.account,
            &unit.region,
            group_id.as_deref(),
        )
        .await?;

        let instances = enrich_all(directory, credential, unit, walked.instances, &walked.addresses).await;
        Ok(UnitOutput {
            instances,
            degraded: walked.addresses_error,
        })
    }
}

/// What one unit produced
struct UnitOutput {
    instances: Vec<Instance>,
    /// Set when the instances are usable but incomplete
    degraded: Option<String>,
}

/// Per-account outcome before aggregation
struct AccountResult {
    instances: Vec<Instance>,
    failures: Vec<UnitFailure>,
}

/// Entry point of the discovery pipeline
pub struct Discoverer {
    pipeline: Pipeline,
    credentials: Arc<dyn CredentialProvider>,
    cache: InstanceCache,
    options: DiscoveryOptions,
}

impl Discoverer {
    pub fn new(
        directory: Arc<dyn CloudDirectory>,
        credentials: Arc<dyn CredentialProvider>,
        cache: InstanceCache,
        options: DiscoveryOptions,
    ) -> Self {
        Self {
            pipeline: Pipeline {
                directory,
                groups: Arc::new(ResourceGroupIndex::new()),
            },
            credentials,
            cache,
            options,
        }
    }

    /// Share a resource group index with other discoverers
    pub fn with_group_index(mut self, groups: Arc<ResourceGroupIndex>) -> Self {
        self.pipeline.groups = groups;
        self
    }

    pub fn group_index(&self) -> &Arc<ResourceGroupIndex> {
        &self.pipeline.groups
    }

    /// Discover every instance in `scope`
    ///
    /// Only instances in `scope.regions` are returned, deduplicated by
    /// canonical id (last writer wins) and sorted by account, region, name.
    /// Failed units are listed in [`Discovery::failures`].
    pub async fn discover(&self, scope: &DiscoveryScope) -> Discovery {
        let run = uuid::Uuid::new_v4();
        let span = tracing::info_span!("discover", %run);

        async {
            let semaphore = Arc::new(Semaphore::new(self.options.max_concurrency.max(1)));

            let accounts = scope
                .accounts
                .iter()
                .map(|account| self.discover_account(account, scope, semaphore.clone()));
            let results = futures::future::join_all(accounts).await;

            let mut failures = Vec::new();
            let mut collected = Vec::new();
            for result in results {
                collected.extend(result.instances);
                failures.extend(result.failures);
            }

            let instances = aggregate(collected, scope);
            tracing::info!(
                "Discovered {} instances across {} accounts ({} failed units)",
                instances.len(),
                scope.accounts.len(),
                failures.len()
            );

            Discovery { instances, failures }
        }
        .instrument(span)
        .await
    }

    /// [`Self::discover`] bounded by a deadline
    pub async fn discover_with_deadline(
        &self,
        scope: &DiscoveryScope,
        deadline: Duration,
    ) -> Result<Discovery, DiscoveryError> {
        tokio::time::timeout(deadline, self.discover(scope))
            .await
            .map_err(|_| DiscoveryError::DeadlineExceeded(deadline))
    }

    fn cache_scope(&self, scope: &DiscoveryScope) -> CacheScope {
        match self.options.region_mode {
            RegionMode::Discover => CacheScope::new(&scope.resource_groups, None),
            RegionMode::Explicit => CacheScope::new(&scope.resource_groups, Some(&scope.regions)),
        }
    }

    async fn discover_account(
        &self,
        account: &str,
        scope: &DiscoveryScope,
        semaphore: Arc<Semaphore>,
    ) -> AccountResult {
        let cache_scope = self.cache_scope(scope);

        let (cached, hit) = self.cache.get(account, &cache_scope).await;
        if hit {
            return AccountResult {
                instances: cached,
                failures: Vec::new(),
            };
        }

        let credential = match self.credentials.credential(account).await {
            Ok(credential) => credential,
            Err(e) => {
                tracing::warn!("Skipping account {}: {}", mask_account(account), e);
                return AccountResult {
                    instances: Vec::new(),
                    failures: vec![UnitFailure::for_account(account, e.to_string())],
                };
            }
        };

        let regions = match self.regions_for(account, &credential, scope, &semaphore).await {
            Ok(regions) => regions,
            Err(e) => {
                tracing::warn!("Failed to fetch regions for {}: {}", mask_account(account), e);
                return AccountResult {
                    instances: Vec::new(),
                    failures: vec![UnitFailure::for_account(account, e.to_string())],
                };
            }
        };

        let units: Vec<DiscoveryRequest> = regions
            .iter()
            .flat_map(|region| {
                scope.group_filters().into_iter().map(move |group| DiscoveryRequest {
                    account: account.to_string(),
                    region: region.clone(),
                    resource_group: group,
                })
            })
            .collect();

        let result = self.run_units(units, credential, semaphore).await;

        if result.failures.is_empty() {
            self.cache.put(account, &cache_scope, &result.instances).await;
        } else {
            tracing::warn!(
                "Not caching instances for {}: {} units failed",
                mask_account(account),
                result.failures.len()
            );
        }

        tracing::info!(
            "Fetched {} instances for account {}",
            result.instances.len(),
            mask_account(account)
        );
        result
    }

    async fn regions_for(
        &self,
        account: &str,
        credential: &Credential,
        scope: &DiscoveryScope,
        semaphore: &Semaphore,
    ) -> Result<Vec<String>, DiscoveryError> {
        match self.options.region_mode {
            RegionMode::Explicit => Ok(scope.regions.clone()),
            RegionMode::Discover => {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|e| DiscoveryError::DirectoryUnavailable(e.into()))?;
                let regions = self
                    .pipeline
                    .directory
                    .list_regions(credential)
                    .await
                    .map_err(DiscoveryError::DirectoryUnavailable)?;
                tracing::debug!("{} regions for {}", regions.len(), mask_account(account));
                Ok(regions)
            }
        }
    }

    /// Spawn one task per unit, each holding a permit while it runs, and
    /// collect them as they finish
    ///
    /// The tasks live in a [`JoinSet`], so dropping this future (a deadline
    /// firing) aborts every unit still running or waiting for a permit.
    async fn run_units(
        &self,
        units: Vec<DiscoveryRequest>,
        credential: Credential,
        semaphore: Arc<Semaphore>,
    ) -> AccountResult {
        let mut tasks = JoinSet::new();

        for unit in units {
            let pipeline = self.pipeline.clone();
            let credential = credential.clone();
            let semaphore = semaphore.clone();

            tasks.spawn(
                async move {
                    let result = match semaphore.acquire_owned().await {
                        Ok(_permit) => AssertUnwindSafe(pipeline.run(&credential, &unit))
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|_| {
                                Err(DiscoveryError::DirectoryUnavailable(anyhow::anyhow!(
                                    "worker panicked"
                                )))
                            }),
                        Err(e) => Err(DiscoveryError::DirectoryUnavailable(e.into())),
                    };
                    (unit, result)
                }
                .in_current_span(),
            );
        }

        let mut instances = Vec::new();
        let mut failures = Vec::new();

        while let Some(joined) = tasks.join_next().await {
            let (unit, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    tracing::warn!("Discovery worker did not finish: {}", e);
                    continue;
                }
            };

            match result {
                Ok(output) => {
                    tracing::info!("Fetched {} instances for {}", output.instances.len(), unit);
                    if let Some(reason) = output.degraded {
                        tracing::warn!("Incomplete instances for {}: {}", unit, reason);
                        failures.push(UnitFailure::for_unit(&unit, reason));
                    }
                    instances.extend(output.instances);
                }
                Err(e) => {
                    tracing::warn!("Error fetching instances for {}: {}", unit, e);
                    failures.push(UnitFailure::for_unit(&unit, e.to_string()));
                }
            }
        }

        AccountResult { instances, failures }
    }
}

/// Keep requested regions, collapse duplicates by canonical id (last wins),
/// and sort for stable output
pub fn aggregate(instances: Vec<Instance>, scope: &DiscoveryScope) -> Vec<Instance> {
    let mut by_id: HashMap<String, Instance> = HashMap::new();
    for instance in instances {
        if !scope.wants_region(&instance.region) {
            continue;
        }
        by_id.insert(instance.canonical_id.clone(), instance);
    }

    let mut merged: Vec<Instance> = by_id.into_values().collect();
    merged.sort_by(|a, b| {
        (&a.account, &a.region, &a.name, &a.canonical_id).cmp(&(
            &b.account,
            &b.region,
            &b.name,
            &b.canonical_id,
        ))
    });
    merged
}
