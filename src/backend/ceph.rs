//! Ceph Backend Inspector
//!
//! Lists RBD images and CephFS subvolumes through the `rbd` and `ceph`
//! CLIs so tests can check that the driver really created (and removed)
//! backing storage.

use crate::domain::ports::{CommandOutput, CommandRunner};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

// =============================================================================
// Cluster ID
// =============================================================================

/// Ceph cluster fsid, the `clusterID` parameter of every class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterId(String);

impl ClusterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolve the cluster ID once per run.
///
/// A non-empty override wins; otherwise `ceph fsid` is asked.
pub async fn resolve_cluster_id(runner: &dyn CommandRunner, override_id: Option<&str>) -> Result<ClusterId> {
    if let Some(id) = override_id.map(str::trim).filter(|id| !id.is_empty()) {
        debug!("Using configured cluster ID: {}", id);
        return Ok(ClusterId::new(id));
    }

    let args = vec!["fsid".to_string()];
    let output = runner.run("ceph", &args, None).await?;
    let output = checked("ceph fsid", output)?;
    let fsid = output.stdout.trim();
    if fsid.is_empty() {
        return Err(Error::Validation("ceph fsid returned an empty cluster ID".to_string()));
    }

    info!("Resolved Ceph cluster ID: {}", fsid);
    Ok(ClusterId::new(fsid))
}

fn checked(command: &str, output: CommandOutput) -> Result<CommandOutput> {
    if output.success {
        Ok(output)
    } else {
        Err(Error::CommandFailed {
            command: command.to_string(),
            output: output.combined(),
        })
    }
}

// =============================================================================
// Inspector
// =============================================================================

#[derive(Debug, Deserialize)]
struct SubvolumeEntry {
    name: String,
}

/// Read-only view of the Ceph pools and filesystems
pub struct CephInspector {
    runner: Arc<dyn CommandRunner>,
    /// RADOS namespace applied to RBD listings
    rados_namespace: Option<String>,
}

impl CephInspector {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            rados_namespace: None,
        }
    }

    pub fn with_rados_namespace(mut self, namespace: Option<String>) -> Self {
        self.rados_namespace = namespace.filter(|ns| !ns.is_empty());
        self
    }

    /// Names of the RBD images in `pool`
    pub async fn list_rbd_images(&self, pool: &str) -> Result<Vec<String>> {
        let mut args = vec!["ls".to_string(), "--format=json".to_string(), format!("--pool={}", pool)];
        if let Some(ns) = &self.rados_namespace {
            args.push(format!("--namespace={}", ns));
        }

        let command = format!("rbd {}", args.join(" "));
        let output = checked(&command, self.runner.run("rbd", &args, None).await?)?;
        parse_json_list::<String>(&output.stdout)
    }

    /// Names of the subvolumes of `group` in filesystem `fs`
    pub async fn list_subvolumes(&self, fs: &str, group: &str) -> Result<Vec<String>> {
        let args = vec![
            "fs".to_string(),
            "subvolume".to_string(),
            "ls".to_string(),
            fs.to_string(),
            format!("--group_name={}", group),
            "--format=json".to_string(),
        ];

        let command = format!("ceph {}", args.join(" "));
        let output = checked(&command, self.runner.run("ceph", &args, None).await?)?;
        Ok(parse_json_list::<SubvolumeEntry>(&output.stdout)?
            .into_iter()
            .map(|s| s.name)
            .collect())
    }

    /// Fail unless `pool` holds exactly `expected` images
    pub async fn validate_rbd_image_count(&self, pool: &str, expected: usize) -> Result<()> {
        let images = self.list_rbd_images(pool).await?;
        compare_count(&format!("RBD image (pool {})", pool), expected, &images)
    }

    /// Fail unless the group holds exactly `expected` subvolumes
    pub async fn validate_subvolume_count(&self, fs: &str, group: &str, expected: usize) -> Result<()> {
        let subvolumes = self.list_subvolumes(fs, group).await?;
        compare_count(&format!("subvolume ({}/{})", fs, group), expected, &subvolumes)
    }
}

/// Empty output means an empty list
fn parse_json_list<T: serde::de::DeserializeOwned>(stdout: &str) -> Result<Vec<T>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(trimmed)?)
}

fn compare_count(what: &str, expected: usize, found: &[String]) -> Result<()> {
    debug!("Found {} {}(s): {:?}", found.len(), what, found);
    if found.len() == expected {
        return Ok(());
    }
    Err(Error::BackendCount {
        what: what.to_string(),
        expected,
        actual: found.len(),
        listing: found.join(", "),
    })
}
