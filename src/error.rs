//! Error taxonomy
//!
//! Per-unit discovery errors are absorbed by the orchestrator, cache errors
//! never leave the cache layer, and publish errors go back to the caller.

use crate::mask::mask_account;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while discovering one unit of work
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// No credential source knows this account
    #[error("credential for account {} not found", mask_account(.account))]
    CredentialNotFound { account: String },

    /// The external directory call itself failed
    #[error("resource directory unavailable: {0:#}")]
    DirectoryUnavailable(#[source] anyhow::Error),

    /// Resource group name did not match any group in the account
    #[error("resource group '{name}' not found")]
    NotFound { name: String },

    /// The paginated walk broke off before the last page
    #[error("partial fetch for account {} in region {region}: {source:#}", mask_account(.account))]
    PartialFetch {
        account: String,
        region: String,
        #[source]
        source: anyhow::Error,
    },

    /// The caller-supplied deadline elapsed
    #[error("discovery did not finish within {0:?}")]
    DeadlineExceeded(Duration),
}

/// Cache store failures. Never fatal.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),

    #[error("cache payload error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Target file write failures
#[derive(Error, Debug)]
pub enum PublishError {
    /// Moving the previous file aside failed; nothing was written
    #[error("failed to back up {}: {source}", .path.display())]
    Backup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode target file: {0}")]
    Encode(#[from] serde_json::Error),
}
