//! Prometheus file-based service discovery output
//!
//! Renders instances as `file_sd_configs` target groups and writes them with
//! a single-generation `.bak` of the previous file.

use crate::error::PublishError;
use crate::model::Instance;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// One entry of the target file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroup {
    pub targets: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

/// Outcome of a successful publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub path: PathBuf,
    /// Set when a previous file was moved aside
    pub backup: Option<PathBuf>,
    pub targets: usize,
    /// Instances left out for lack of any address
    pub skipped: usize,
}

/// `path` with `.bak` appended to the full file name
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".bak");
    PathBuf::from(name)
}

/// Labels for one instance; tags become `tag_0..tag_N` in attachment order
pub fn labels_for(instance: &Instance) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([
        ("instance".to_string(), instance.name.clone()),
        ("region".to_string(), instance.region.clone()),
        ("account".to_string(), instance.account.clone()),
        ("status".to_string(), instance.status.clone()),
        ("privateAddress".to_string(), instance.private_address.clone()),
        ("publicAddress".to_string(), instance.public_address.clone()),
        ("canonicalID".to_string(), instance.canonical_id.clone()),
        ("availabilityZone".to_string(), instance.availability_zone.clone()),
        ("profile".to_string(), instance.profile.clone()),
    ]);

    for (i, tag) in instance.tags.iter().enumerate() {
        labels.insert(format!("tag_{}", i), tag.clone());
    }

    labels
}

/// Build target groups, skipping instances with no usable address
pub fn render(instances: &[Instance]) -> (Vec<TargetGroup>, usize) {
    let mut skipped = 0;
    let groups = instances
        .iter()
        .filter_map(|instance| match instance.primary_address() {
            Some(address) => Some(TargetGroup {
                targets: vec![address.to_string()],
                labels: labels_for(instance),
            }),
            None => {
                tracing::warn!("Instance {} has no address, leaving it out of the target file", instance.name);
                skipped += 1;
                None
            }
        })
        .collect();

    (groups, skipped)
}

/// Write the target file for `instances` to `path`
///
/// An existing file is first renamed to `path.bak`, replacing any older
/// backup. If that rename fails nothing is written.
pub fn publish(instances: &[Instance], path: &Path) -> Result<PublishReport, PublishError> {
    let (groups, skipped) = render(instances);
    let mut content = serde_json::to_vec_pretty(&groups)?;
    content.push(b'\n');

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| PublishError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let backup = if path.exists() {
        let backup = backup_path(path);
        std::fs::rename(path, &backup).map_err(|source| {
            tracing::error!("Failed to create backup of {}: {}", path.display(), source);
            PublishError::Backup {
                path: path.to_path_buf(),
                source,
            }
        })?;
        tracing::info!("Backup created: {}", backup.display());
        Some(backup)
    } else {
        None
    };

    let io_err = |source| PublishError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::create(path).map_err(io_err)?;
    file.write_all(&content).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;

    tracing::info!(
        "Prometheus file-based service discovery JSON written to {} ({} targets)",
        path.display(),
        groups.len()
    );

    Ok(PublishReport {
        path: path.to_path_buf(),
        backup,
        targets: groups.len(),
        skipped,
    })
}
