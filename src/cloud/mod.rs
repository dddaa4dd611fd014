//! Cloud API interaction module
//!
//! Collaborator contracts the discovery pipeline depends on, plus the IBM
//! Cloud VPC implementation of them.
//!
//! # Module Structure
//!
//! - [`auth`] - API key to bearer token exchange with token caching
//! - [`client`] - VPC, resource manager and tagging client implementing [`CloudDirectory`]
//! - [`credentials`] - API key lookup chain (environment, config, Vault)
//! - [`http`] - HTTP utilities for REST API calls
//! - [`types`] - Response payloads
//!
//! # Example
//!
//! ```ignore
//! use vpcsd::cloud::{client::VpcClient, CloudDirectory, Credential};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let client = VpcClient::new(Default::default())?;
//!     let credential = Credential::new("my-api-key");
//!     let regions = client.list_regions(&credential).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod credentials;
pub mod http;
pub mod types;

use crate::error::DiscoveryError;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use types::{FloatingIp, InstancePage, ResourceGroup};

/// An account's API key
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    api_key: String,
}

impl Credential {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    pub fn expose(&self) -> &str {
        &self.api_key
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Resolves an account key to its secret
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credential(&self, account: &str) -> std::result::Result<Credential, DiscoveryError>;
}

/// Listing calls against the cloud's resource directory
#[async_trait]
pub trait CloudDirectory: Send + Sync {
    async fn list_regions(&self, credential: &Credential) -> Result<Vec<String>>;

    async fn list_resource_groups(&self, credential: &Credential) -> Result<Vec<ResourceGroup>>;

    /// One page of instances. `start` is the token taken from the previous page.
    async fn list_instances(
        &self,
        credential: &Credential,
        region: &str,
        resource_group_id: Option<&str>,
        start: Option<&str>,
    ) -> Result<InstancePage>;

    /// Every floating IP in the region
    async fn list_floating_ips(&self, credential: &Credential, region: &str) -> Result<Vec<FloatingIp>>;

    /// Tag names attached to a resource, keyed by its CRN
    async fn list_tags(&self, credential: &Credential, crn: &str) -> Result<Vec<String>>;
}
