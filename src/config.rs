//! Configuration Management
//!
//! Loads the vpcsd configuration file (JSON or YAML) and merges it with
//! command line overrides.

use crate::cache::DEFAULT_TTL;
use crate::cloud::client::Endpoints;
use crate::cloud::credentials::VaultConfig;
use crate::discovery::DEFAULT_MAX_CONCURRENCY;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Name of the config file looked up in the working and config directories
const CONFIG_FILE_NAME: &str = "config.json";

const DEFAULT_ACCOUNTS: &[&str] = &["account1", "account2"];
const DEFAULT_REGIONS: &[&str] = &["us-east"];
const DEFAULT_RESOURCE_GROUPS: &[&str] = &["default"];
const DEFAULT_OUTPUT_SD_FILE: &str = "./prometheus_sd.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: DEFAULT_TTL.as_secs(),
        }
    }
}

/// Tool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Account key -> API key. An empty key defers to env/Vault lookup.
    pub accounts: HashMap<String, String>,
    pub regions: Vec<String>,
    pub resource_groups: Vec<String>,
    pub output_sd_file: Option<PathBuf>,
    /// List every region per account instead of only the requested ones
    pub discover_regions: bool,
    pub max_concurrency: usize,
    pub cache: CacheConfig,
    /// Overall deadline for one discovery pass
    pub discovery_timeout_secs: Option<u64>,
    pub vault: Option<VaultConfig>,
    pub endpoints: Endpoints,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            accounts: HashMap::new(),
            regions: Vec::new(),
            resource_groups: Vec::new(),
            output_sd_file: None,
            discover_regions: true,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            cache: CacheConfig::default(),
            discovery_timeout_secs: None,
            vault: None,
            endpoints: Endpoints::default(),
        }
    }
}

impl Config {
    /// Candidate config file locations, in lookup order
    fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("vpcsd").join(CONFIG_FILE_NAME));
        }
        paths
    }

    /// Load `explicit` if given (errors propagate), else the first default
    /// location that exists. Unreadable default files fall back to defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        for path in Self::default_paths() {
            if !path.exists() {
                continue;
            }
            match Self::from_file(&path) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {}", path.display());
                    return Ok(config);
                }
                Err(e) => {
                    tracing::warn!("Config file unreadable, falling back to defaults: {:#}", e);
                    return Ok(Self::default());
                }
            }
        }

        Ok(Self::default())
    }

    /// Parse a config file; `.yaml`/`.yml` as YAML, everything else as JSON
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
            .unwrap_or(false);

        if is_yaml {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config {}", path.display()))
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config {}", path.display()))
        }
    }

    /// Accounts to scan (CLI > config > default)
    pub fn effective_accounts(&self, cli: &[String]) -> Vec<String> {
        if !cli.is_empty() {
            return cli.to_vec();
        }
        if !self.accounts.is_empty() {
            let mut accounts: Vec<String> = self.accounts.keys().cloned().collect();
            accounts.sort();
            return accounts;
        }
        to_strings(DEFAULT_ACCOUNTS)
    }

    /// Regions to report (CLI > config > default)
    pub fn effective_regions(&self, cli: &[String]) -> Vec<String> {
        pick(cli, &self.regions, DEFAULT_REGIONS)
    }

    /// Resource groups to filter on (CLI > config > default)
    pub fn effective_resource_groups(&self, cli: &[String]) -> Vec<String> {
        pick(cli, &self.resource_groups, DEFAULT_RESOURCE_GROUPS)
    }

    /// Target file path (CLI > config > default)
    pub fn effective_output(&self, cli: Option<&Path>) -> PathBuf {
        cli.map(Path::to_path_buf)
            .or_else(|| self.output_sd_file.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_SD_FILE))
    }

    /// Inline API keys from the `accounts` map
    pub fn configured_keys(&self) -> HashMap<String, String> {
        self.accounts
            .iter()
            .filter(|(_, key)| !key.is_empty())
            .map(|(account, key)| (account.clone(), key.clone()))
            .collect()
    }
}

fn pick(cli: &[String], configured: &[String], default: &[&str]) -> Vec<String> {
    if !cli.is_empty() {
        cli.to_vec()
    } else if !configured.is_empty() {
        configured.to_vec()
    } else {
        to_strings(default)
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}
