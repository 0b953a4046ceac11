//! StorageClass builders and lifecycle
//!
//! Classes start from a YAML template and are filled in with the driver
//! name, pool or filesystem, the CSI secret references and the cluster ID.

use super::{create_object, delete_and_await_removal};
use crate::backend::ClusterId;
use crate::config::E2eConfig;
use crate::domain::ports::{ResourceApi, ResourceRef};
use crate::error::Result;
use crate::poll::Waiter;
use k8s_openapi::api::storage::v1::StorageClass;
use std::collections::BTreeMap;
use std::fmt;

pub const CLUSTER_ID_PARAM: &str = "clusterID";

const PROVISIONER_SECRET_NAME: &str = "csi.storage.k8s.io/provisioner-secret-name";
const PROVISIONER_SECRET_NAMESPACE: &str = "csi.storage.k8s.io/provisioner-secret-namespace";
const EXPAND_SECRET_NAME: &str = "csi.storage.k8s.io/controller-expand-secret-name";
const EXPAND_SECRET_NAMESPACE: &str = "csi.storage.k8s.io/controller-expand-secret-namespace";
const NODE_STAGE_SECRET_NAME: &str = "csi.storage.k8s.io/node-stage-secret-name";
const NODE_STAGE_SECRET_NAMESPACE: &str = "csi.storage.k8s.io/node-stage-secret-namespace";

// =============================================================================
// Options
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReclaimPolicy {
    #[default]
    Delete,
    Retain,
}

impl fmt::Display for ReclaimPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReclaimPolicy::Delete => f.write_str("Delete"),
            ReclaimPolicy::Retain => f.write_str("Retain"),
        }
    }
}

/// Class-level settings outside `parameters`
#[derive(Debug, Clone, Default)]
pub struct ClassOptions {
    /// Bind volumes only once a consuming pod is scheduled
    pub wait_for_first_consumer: bool,
    /// Comma-separated mount options, e.g. `discard,nouuid`
    pub mount_options: Option<String>,
    pub reclaim_policy: ReclaimPolicy,
}

// =============================================================================
// Builders
// =============================================================================

/// Fill an RBD class template.
///
/// `overrides` are applied last; an empty value removes the key.
pub fn rbd_storage_class(
    template: StorageClass,
    config: &E2eConfig,
    cluster_id: &ClusterId,
    options: &ClassOptions,
    overrides: &BTreeMap<String, String>,
) -> StorageClass {
    let mut sc = template;
    sc.metadata.name = Some(config.rbd.storage_class.clone());
    sc.provisioner = config.rbd.provisioner.clone();

    let params = sc.parameters.get_or_insert_with(BTreeMap::new);
    params.insert("pool".to_string(), config.rbd.pool.clone());
    set_secrets(
        params,
        &config.rbd.provisioner_secret,
        &config.rbd.node_secret,
        &config.secret_namespace,
    );
    if let Some(ns) = config.rbd.rados_namespace.as_ref().filter(|ns| !ns.is_empty()) {
        params.insert("radosNamespace".to_string(), ns.clone());
    }
    if params.get(CLUSTER_ID_PARAM).map_or(true, |v| v.is_empty()) {
        params.insert(CLUSTER_ID_PARAM.to_string(), cluster_id.to_string());
    }
    apply_overrides(params, overrides);

    if options.wait_for_first_consumer {
        sc.volume_binding_mode = Some("WaitForFirstConsumer".to_string());
    }
    if let Some(mount_options) = &options.mount_options {
        sc.mount_options.get_or_insert_with(Vec::new).extend(
            mount_options
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string),
        );
    }
    sc.reclaim_policy = Some(options.reclaim_policy.to_string());
    sc
}

/// Fill a CephFS class template.
///
/// Mount options from the template are cleared. `enable_pool` pins the
/// data pool. `overrides` follow the same rule as for RBD.
pub fn cephfs_storage_class(
    template: StorageClass,
    config: &E2eConfig,
    cluster_id: &ClusterId,
    enable_pool: bool,
    overrides: &BTreeMap<String, String>,
) -> StorageClass {
    let mut sc = template;
    sc.metadata.name = Some(config.cephfs.storage_class.clone());
    sc.provisioner = config.cephfs.provisioner.clone();
    sc.mount_options = None;

    let params = sc.parameters.get_or_insert_with(BTreeMap::new);
    params.insert("fsName".to_string(), config.cephfs.filesystem.clone());
    set_secrets(
        params,
        &config.cephfs.provisioner_secret,
        &config.cephfs.node_secret,
        &config.secret_namespace,
    );
    if enable_pool {
        params.insert("pool".to_string(), config.cephfs.data_pool.clone());
    }
    apply_overrides(params, overrides);
    if params.get(CLUSTER_ID_PARAM).map_or(true, |v| v.is_empty()) {
        params.insert(CLUSTER_ID_PARAM.to_string(), cluster_id.to_string());
    }
    sc
}

/// An empty value removes the key
fn apply_overrides(params: &mut BTreeMap<String, String>, overrides: &BTreeMap<String, String>) {
    for (key, value) in overrides {
        if value.is_empty() {
            params.remove(key);
        } else {
            params.insert(key.clone(), value.clone());
        }
    }
}

fn set_secrets(params: &mut BTreeMap<String, String>, provisioner: &str, node: &str, namespace: &str) {
    for (key, value) in [
        (PROVISIONER_SECRET_NAME, provisioner),
        (PROVISIONER_SECRET_NAMESPACE, namespace),
        (EXPAND_SECRET_NAME, provisioner),
        (EXPAND_SECRET_NAMESPACE, namespace),
        (NODE_STAGE_SECRET_NAME, node),
        (NODE_STAGE_SECRET_NAMESPACE, namespace),
    ] {
        params.insert(key.to_string(), value.to_string());
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

pub async fn create_storage_class(api: &dyn ResourceApi<StorageClass>, sc: &StorageClass, waiter: &Waiter) -> Result<()> {
    let name = sc.metadata.name.as_deref().unwrap_or_default();
    let resource = ResourceRef::cluster("StorageClass", name);
    create_object(api, sc, &resource, waiter).await?;
    Ok(())
}

pub async fn delete_storage_class(api: &dyn ResourceApi<StorageClass>, name: &str, waiter: &Waiter) -> Result<()> {
    let resource = ResourceRef::cluster("StorageClass", name);
    delete_and_await_removal(api, &resource, waiter).await
}
