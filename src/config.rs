//! Suite configuration
//!
//! Defaults match a Rook-deployed Ceph cluster with the CSI drivers in the
//! `rook-ceph` namespace. The binary overrides them from flags and env.

use crate::error::Result;
use crate::poll::PollSpec;
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// RBD
// =============================================================================

/// Configuration for RBD (block) volumes
#[derive(Debug, Clone)]
pub struct RbdConfig {
    /// Pool holding the images
    pub pool: String,
    /// RADOS namespace inside the pool, if any
    pub rados_namespace: Option<String>,
    /// CSI driver name
    pub provisioner: String,
    /// StorageClass the suite creates
    pub storage_class: String,
    /// Secret used by the provisioner and resizer
    pub provisioner_secret: String,
    /// Secret used by the node plugin
    pub node_secret: String,
}

impl Default for RbdConfig {
    fn default() -> Self {
        Self {
            pool: "replicapool".to_string(),
            rados_namespace: None,
            provisioner: "rook-ceph.rbd.csi.ceph.com".to_string(),
            storage_class: "csi-rbd-sc".to_string(),
            provisioner_secret: "rook-csi-rbd-provisioner".to_string(),
            node_secret: "rook-csi-rbd-node".to_string(),
        }
    }
}

// =============================================================================
// CephFS
// =============================================================================

/// Configuration for CephFS (file) volumes
#[derive(Debug, Clone)]
pub struct CephFsConfig {
    /// Filesystem name
    pub filesystem: String,
    /// Subvolume group the driver provisions into
    pub subvolume_group: String,
    /// Data pool set on the class when pool selection is enabled
    pub data_pool: String,
    pub provisioner: String,
    pub storage_class: String,
    pub provisioner_secret: String,
    pub node_secret: String,
}

impl Default for CephFsConfig {
    fn default() -> Self {
        Self {
            filesystem: "myfs".to_string(),
            subvolume_group: "csi".to_string(),
            data_pool: "myfs-replicated".to_string(),
            provisioner: "rook-ceph.cephfs.csi.ceph.com".to_string(),
            storage_class: "csi-cephfs-sc".to_string(),
            provisioner_secret: "rook-csi-cephfs-provisioner".to_string(),
            node_secret: "rook-csi-cephfs-node".to_string(),
        }
    }
}

// =============================================================================
// Suite Configuration
// =============================================================================

/// Configuration for a suite run
#[derive(Debug, Clone)]
pub struct E2eConfig {
    /// Budget for every create/delete/readiness wait
    pub deploy_timeout: Duration,
    /// Delay between polls
    pub poll_interval: Duration,
    /// Namespace the CSI drivers run in
    pub csi_namespace: String,
    /// Namespace holding the CSI secrets
    pub secret_namespace: String,
    pub rbd: RbdConfig,
    pub cephfs: CephFsConfig,
    /// Root of the YAML fixtures
    pub manifest_dir: PathBuf,
    /// Ceph fsid override; resolved with `ceph fsid` when absent
    pub cluster_id: Option<String>,
    /// kubeconfig passed to kubectl; kubectl's own lookup when absent
    pub kubeconfig: Option<PathBuf>,
    /// Pod security level enforced on test namespaces
    pub pod_security_level: String,
    /// Requested size when expanding a claim
    pub expand_size: String,
}

impl Default for E2eConfig {
    fn default() -> Self {
        Self {
            deploy_timeout: Duration::from_secs(2 * 60),
            poll_interval: Duration::from_secs(2),
            csi_namespace: "rook-ceph".to_string(),
            secret_namespace: "rook-ceph-external".to_string(),
            rbd: RbdConfig::default(),
            cephfs: CephFsConfig::default(),
            manifest_dir: PathBuf::from("manifest"),
            cluster_id: None,
            kubeconfig: None,
            pod_security_level: "privileged".to_string(),
            expand_size: "2Gi".to_string(),
        }
    }
}

impl E2eConfig {
    /// Poll spec used by the orchestrators
    pub fn poll_spec(&self) -> Result<PollSpec> {
        PollSpec::new(self.poll_interval, self.deploy_timeout)
    }

    /// Path of a fixture relative to the manifest directory
    pub fn manifest(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.manifest_dir.join(relative)
    }
}
