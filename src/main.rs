use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use vpcsd::cache::{CacheStore, DisabledStore, InstanceCache, MemoryStore};
use vpcsd::cloud::client::VpcClient;
use vpcsd::cloud::credentials::CredentialChain;
use vpcsd::cloud::http::format_cloud_error;
use vpcsd::config::Config;
use vpcsd::discovery::{Discoverer, DiscoveryOptions, RegionMode};
use vpcsd::error::DiscoveryError;
use vpcsd::model::{Discovery, DiscoveryScope};
use vpcsd::{publish, VERSION};

/// IBM Cloud VPC service discovery for Prometheus
#[derive(Parser, Debug)]
#[command(name = "vpcsd", version = VERSION, about, long_about = None)]
struct Args {
    /// Config file (JSON, or YAML by extension)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Comma-separated account keys
    #[arg(long, global = true, value_delimiter = ',')]
    accounts: Vec<String>,

    /// Comma-separated regions to report
    #[arg(long, global = true, value_delimiter = ',')]
    regions: Vec<String>,

    /// Comma-separated resource group names
    #[arg(long = "resource-groups", global = true, value_delimiter = ',')]
    resource_groups: Vec<String>,

    /// Fail when any account, region or resource group could not be fetched
    #[arg(long, global = true)]
    strict: bool,

    /// Log level (RUST_LOG takes precedence when set)
    #[arg(long, value_enum, default_value = "info", global = true)]
    log_level: LogLevel,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print discovered instances as JSON
    Instances,

    /// Write the Prometheus target file once
    Publish {
        /// Target file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Rewrite the Prometheus target file periodically
    Watch {
        /// Target file path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Seconds between discovery passes
        #[arg(long, default_value_t = 60)]
        interval: u64,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(
    level: LogLevel,
    log_file: Option<&Path>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(spec) if !spec.is_empty() => EnvFilter::new(spec),
        _ => match level.to_tracing_level() {
            Some(level) => EnvFilter::new(format!("vpcsd={}", level.as_str().to_ascii_lowercase())),
            None => return Ok(None),
        },
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false);

    let Some(path) = log_file else {
        builder.with_writer(std::io::stderr).init();
        return Ok(None);
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    builder
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    Ok(Some(guard))
}

fn build_discoverer(config: &Config) -> Result<Discoverer> {
    let client = VpcClient::new(config.endpoints.clone())?;
    let credentials = CredentialChain::new(
        client.http.clone(),
        config.configured_keys(),
        config.vault.clone(),
    );

    let store: Arc<dyn CacheStore> = if config.cache.enabled {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(DisabledStore)
    };
    let cache = InstanceCache::new(store, Duration::from_secs(config.cache.ttl_secs));

    let options = DiscoveryOptions {
        max_concurrency: config.max_concurrency,
        region_mode: if config.discover_regions {
            RegionMode::Discover
        } else {
            RegionMode::Explicit
        },
    };

    Ok(Discoverer::new(
        Arc::new(client),
        Arc::new(credentials),
        cache,
        options,
    ))
}

async fn run_discovery(
    discoverer: &Discoverer,
    scope: &DiscoveryScope,
    timeout: Option<Duration>,
    strict: bool,
) -> Result<Discovery> {
    let discovery = match timeout {
        Some(deadline) => discoverer.discover_with_deadline(scope, deadline).await?,
        None => discoverer.discover(scope).await,
    };

    for failure in &discovery.failures {
        tracing::warn!(
            "Incomplete: account {} region {} resource group {}: {}",
            vpcsd::mask::mask_account(&failure.account),
            failure.region.as_deref().unwrap_or("*"),
            failure.resource_group.as_deref().unwrap_or("*"),
            failure.reason
        );
    }

    if strict && discovery.is_partial() {
        return Err(anyhow::anyhow!(
            "{} discovery units failed",
            discovery.failures.len()
        ));
    }

    Ok(discovery)
}

/// Drive `work` to completion unless `shutdown` resolves first
///
/// A discovery pass cut short this way is dropped, which aborts its workers.
async fn or_shutdown<F, S>(work: F, shutdown: &mut Pin<&mut S>) -> Option<F::Output>
where
    F: Future,
    S: Future,
{
    tokio::select! {
        output = work => Some(output),
        _ = shutdown.as_mut() => None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level, args.log_file.as_deref())?;

    let config = Config::load(args.config.as_deref())?;
    let scope = DiscoveryScope::new(
        config.effective_accounts(&args.accounts),
        config.effective_regions(&args.regions),
        config.effective_resource_groups(&args.resource_groups),
    );
    let timeout = config.discovery_timeout_secs.map(Duration::from_secs);

    tracing::info!(
        "vpcsd {} using accounts={} regions={:?} resource_groups={:?}",
        VERSION,
        scope
            .accounts
            .iter()
            .map(|a| vpcsd::mask::mask_account(a))
            .collect::<Vec<_>>()
            .join(","),
        scope.regions,
        scope.resource_groups
    );

    let discoverer = build_discoverer(&config)?;

    match args.command {
        Command::Instances => {
            let discovery = run_discovery(&discoverer, &scope, timeout, args.strict).await?;
            println!("{}", serde_json::to_string_pretty(&discovery.instances)?);
        }
        Command::Publish { output } => {
            let path = config.effective_output(output.as_deref());
            let discovery = run_discovery(&discoverer, &scope, timeout, args.strict).await?;
            let report = publish::publish(&discovery.instances, &path)?;
            tracing::info!("Published {} targets to {}", report.targets, report.path.display());
        }
        Command::Watch { output, interval } => {
            let path = config.effective_output(output.as_deref());
            let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));

            let strict = args.strict;
            let shutdown = tokio::signal::ctrl_c();
            tokio::pin!(shutdown);

            loop {
                if or_shutdown(ticker.tick(), &mut shutdown).await.is_none() {
                    break;
                }

                let cycle = async {
                    match run_discovery(&discoverer, &scope, timeout, strict).await {
                        Ok(discovery) => {
                            if let Err(e) = publish::publish(&discovery.instances, &path) {
                                tracing::error!("Publish failed: {}", e);
                            }
                        }
                        Err(e) => match e.downcast_ref::<DiscoveryError>() {
                            Some(DiscoveryError::DeadlineExceeded(_)) => {
                                tracing::error!("Discovery pass timed out: {}", e)
                            }
                            _ => tracing::error!("Discovery pass failed: {}", format_cloud_error(&e)),
                        },
                    }
                };
                if or_shutdown(cycle, &mut shutdown).await.is_none() {
                    break;
                }
            }
            tracing::info!("Interrupted, exiting");
        }
    }

    Ok(())
}
