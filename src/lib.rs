//! vpcsd
//!
//! Discovers IBM Cloud VPC instances across accounts, regions and resource
//! groups, caches them per account, and publishes them as Prometheus
//! file-based service discovery targets.

pub mod cache;
pub mod cloud;
pub mod config;
pub mod discovery;
pub mod error;
pub mod mask;
pub mod model;
pub mod publish;

/// Version injected at compile time via VPCSD_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("VPCSD_VERSION") {
    Some(v) => v,
    None => "dev",
};
