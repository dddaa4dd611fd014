//! Discovery pipeline
//!
//! # Architecture
//!
//! - [`resolver`] - Memoized resource group name to id resolution
//! - [`walker`] - Drains the paginated instance listing for one region
//! - [`enricher`] - Joins instances with floating IPs and tags
//! - [`orchestrator`] - Bounded fan-out over accounts, regions and groups
//!
//! # Example
//!
//! ```ignore
//! use vpcsd::discovery::{Discoverer, DiscoveryOptions};
//! use vpcsd::model::DiscoveryScope;
//!
//! async fn run(discoverer: &Discoverer) {
//!     let scope = DiscoveryScope::new(
//!         vec!["prod".into()],
//!         vec!["us-east".into()],
//!         vec!["default".into()],
//!     );
//!     let discovery = discoverer.discover(&scope).await;
//!     println!("{} instances", discovery.instances.len());
//! }
//! ```

pub mod enricher;
pub mod orchestrator;
pub mod resolver;
pub mod walker;

pub use enricher::AddressMap;
pub use orchestrator::{aggregate, Discoverer, DiscoveryOptions, RegionMode, DEFAULT_MAX_CONCURRENCY};
pub use resolver::ResourceGroupIndex;
pub use walker::{walk, Walk};
