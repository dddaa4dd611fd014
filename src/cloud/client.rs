//! VPC Client
//!
//! IBM Cloud implementation of [`CloudDirectory`], combining IAM
//! authentication with the VPC, resource manager and global tagging APIs.

use super::auth::IamTokenSource;
use super::http::{status_of, CloudHttpClient};
use super::types::{
    FloatingIp, FloatingIpPage, InstancePage, RegionList, ResourceGroup, ResourceGroupList, TagList,
};
use super::{CloudDirectory, Credential};
use crate::mask::mask_token;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Page size requested from list endpoints
const PAGE_LIMIT: &str = "100";

/// Upper bound on floating IP pages; a listing that needs more is an error
const MAX_FLOATING_IP_PAGES: usize = 1000;

/// API endpoints. Overridable for private endpoints and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub iam_token_url: String,
    /// Regional VPC base URL; `{region}` is substituted
    pub regional_vpc_url: String,
    /// Any VPC endpoint, used for region listing
    pub global_vpc_url: String,
    pub resource_manager_url: String,
    pub tagging_url: String,
    /// VPC API version date
    pub api_version: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            iam_token_url: "https://iam.cloud.ibm.com/identity/token".to_string(),
            regional_vpc_url: "https://{region}.iaas.cloud.ibm.com/v1".to_string(),
            global_vpc_url: "https://us-south.iaas.cloud.ibm.com/v1".to_string(),
            resource_manager_url: "https://resource-controller.cloud.ibm.com/v2".to_string(),
            tagging_url: "https://tags.global-search-tagging.cloud.ibm.com/v3".to_string(),
            api_version: "2024-04-30".to_string(),
        }
    }
}

/// Main IBM Cloud client
#[derive(Clone)]
pub struct VpcClient {
    pub http: CloudHttpClient,
    pub tokens: IamTokenSource,
    pub endpoints: Endpoints,
}

impl VpcClient {
    pub fn new(endpoints: Endpoints) -> Result<Self> {
        let http = CloudHttpClient::new()?;
        let tokens = IamTokenSource::new(http.clone(), endpoints.iam_token_url.clone());

        Ok(Self {
            http,
            tokens,
            endpoints,
        })
    }

    // =========================================================================
    // URL helpers
    // =========================================================================

    /// Build a regional VPC API URL
    pub fn vpc_regional_url(&self, region: &str, resource: &str) -> String {
        format!(
            "{}/{}",
            self.endpoints
                .regional_vpc_url
                .replace("{region}", region)
                .trim_end_matches('/'),
            resource
        )
    }

    /// Build a VPC URL that isn't tied to a region
    pub fn vpc_global_url(&self, resource: &str) -> String {
        format!("{}/{}", self.endpoints.global_vpc_url.trim_end_matches('/'), resource)
    }

    pub fn resource_manager_url(&self, resource: &str) -> String {
        format!(
            "{}/{}",
            self.endpoints.resource_manager_url.trim_end_matches('/'),
            resource
        )
    }

    pub fn tagging_url(&self, resource: &str) -> String {
        format!("{}/{}", self.endpoints.tagging_url.trim_end_matches('/'), resource)
    }

    // =========================================================================
    // Request helpers
    // =========================================================================

    /// GET with a bearer token; a 401 drops the cached token so the next call re-authenticates
    async fn get<T: DeserializeOwned>(
        &self,
        credential: &Credential,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let token = self.tokens.get_token(credential).await?;
        let result = self.http.get_json(url, &token, query).await;

        if let Err(ref e) = result {
            if status_of(e) == Some(401) {
                self.tokens.invalidate(credential).await;
            }
        }

        result
    }

    /// GET against the VPC API, which requires `version` and `generation`
    async fn vpc_get<T: DeserializeOwned>(
        &self,
        credential: &Credential,
        url: &str,
        extra: &[(&str, &str)],
    ) -> Result<T> {
        let mut query = vec![
            ("version", self.endpoints.api_version.as_str()),
            ("generation", "2"),
        ];
        query.extend_from_slice(extra);
        self.get(credential, url, &query).await
    }
}

#[async_trait]
impl CloudDirectory for VpcClient {
    async fn list_regions(&self, credential: &Credential) -> Result<Vec<String>> {
        let url = self.vpc_global_url("regions");
        let list: RegionList = self
            .vpc_get(credential, &url, &[])
            .await
            .context("Failed to list regions")?;

        let regions: Vec<String> = list
            .regions
            .into_iter()
            .map(|r| r.name)
            .filter(|n| !n.is_empty())
            .collect();

        tracing::info!("Available regions: {:?}", regions);
        Ok(regions)
    }

    async fn list_resource_groups(&self, credential: &Credential) -> Result<Vec<ResourceGroup>> {
        let url = self.resource_manager_url("resource_groups");
        let list: ResourceGroupList = self
            .get(credential, &url, &[])
            .await
            .context("Failed to list resource groups")?;

        Ok(list.resources)
    }

    async fn list_instances(
        &self,
        credential: &Credential,
        region: &str,
        resource_group_id: Option<&str>,
        start: Option<&str>,
    ) -> Result<InstancePage> {
        let url = self.vpc_regional_url(region, "instances");

        let mut query = vec![("limit", PAGE_LIMIT)];
        if let Some(id) = resource_group_id {
            query.push(("resource_group.id", id));
        }
        if let Some(token) = start {
            query.push(("start", token));
        }

        self.vpc_get(credential, &url, &query)
            .await
            .with_context(|| format!("Failed to list instances in {}", region))
    }

    async fn list_floating_ips(&self, credential: &Credential, region: &str) -> Result<Vec<FloatingIp>> {
        let url = self.vpc_regional_url(region, "floating_ips");
        let mut all = Vec::new();
        let mut start: Option<String> = None;

        for _ in 0..MAX_FLOATING_IP_PAGES {
            let mut query = vec![("limit", PAGE_LIMIT)];
            if let Some(ref token) = start {
                query.push(("start", token.as_str()));
            }

            let page: FloatingIpPage = self
                .vpc_get(credential, &url, &query)
                .await
                .with_context(|| format!("Failed to list floating IPs in {}", region))?;
            all.extend(page.floating_ips);

            let next = match page.next {
                Some(link) => link.start_token()?,
                None => None,
            };
            match next {
                None => return Ok(all),
                Some(token) if start.as_deref() == Some(token.as_str()) => {
                    return Err(anyhow::anyhow!(
                        "floating IP pagination token {} did not advance in {}",
                        mask_token(&token),
                        region
                    ));
                }
                Some(token) => start = Some(token),
            }
        }

        Err(anyhow::anyhow!(
            "floating IP listing in {} still had more pages after {}",
            region,
            MAX_FLOATING_IP_PAGES
        ))
    }

    /// Follows `offset` until `total_count` tags have been read
    async fn list_tags(&self, credential: &Credential, crn: &str) -> Result<Vec<String>> {
        let url = self.tagging_url("tags");
        let mut tags = Vec::new();

        loop {
            let offset = tags.len().to_string();
            let query = [
                ("attached_to", crn),
                ("limit", PAGE_LIMIT),
                ("offset", offset.as_str()),
            ];
            let list: TagList = self
                .get(credential, &url, &query)
                .await
                .context("Failed to list tags")?;

            let received = list.items.len();
            tags.extend(list.items.into_iter().map(|t| t.name));

            match list.total_count {
                Some(total) if received > 0 && (tags.len() as u64) < total => continue,
                _ => return Ok(tags),
            }
        }
    }
}
