//! Per-case framework
//!
//! `Environment` is built once per run (client, config, cluster ID, tool
//! runner, cancellation). `Framework` binds it to one case namespace and
//! offers the fixture-level steps the suites are written in.

use crate::backend::{CephInspector, ClusterId};
use crate::config::E2eConfig;
use crate::crd::{VolumeSnapshot, VolumeSnapshotClass};
use crate::domain::ports::CommandRunner;
use crate::error::Result;
use crate::lifecycle::{self, ClassOptions, Kubectl};
use crate::manifest;
use crate::poll::Waiter;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{
    Namespace, PersistentVolume, PersistentVolumeClaim, Pod, Secret, Service,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::NamespaceResourceScope;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Environment
// =============================================================================

/// Everything shared by all cases of a run
#[derive(Clone)]
pub struct Environment {
    pub client: Client,
    pub config: Arc<E2eConfig>,
    pub cluster_id: ClusterId,
    pub runner: Arc<dyn CommandRunner>,
    pub cancel: CancellationToken,
}

impl Environment {
    pub fn waiter(&self) -> Result<Waiter> {
        Ok(Waiter::new(self.config.poll_spec()?, self.cancel.clone()))
    }

    pub fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }

    /// Framework bound to one case namespace
    pub fn framework(&self, namespace: &str, waiter: Waiter) -> Framework {
        Framework {
            client: self.client.clone(),
            config: self.config.clone(),
            cluster_id: self.cluster_id.clone(),
            kubectl: Kubectl::new(self.runner.clone(), self.config.kubeconfig.clone()),
            ceph: CephInspector::new(self.runner.clone())
                .with_rados_namespace(self.config.rbd.rados_namespace.clone()),
            runner: self.runner.clone(),
            namespace: namespace.to_string(),
            waiter,
        }
    }
}

// =============================================================================
// Framework
// =============================================================================

pub struct Framework {
    client: Client,
    pub config: Arc<E2eConfig>,
    pub cluster_id: ClusterId,
    pub kubectl: Kubectl,
    pub ceph: CephInspector,
    pub runner: Arc<dyn CommandRunner>,
    /// Namespace of the running case
    pub namespace: String,
    pub waiter: Waiter,
}

impl Framework {
    fn namespaced<K>(&self) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    pub fn pvcs(&self) -> Api<PersistentVolumeClaim> {
        self.namespaced()
    }

    pub fn pvs(&self) -> Api<PersistentVolume> {
        Api::all(self.client.clone())
    }

    pub fn pods(&self) -> Api<Pod> {
        self.namespaced()
    }

    pub fn pods_in(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn statefulsets(&self) -> Api<StatefulSet> {
        self.namespaced()
    }

    pub fn secrets(&self) -> Api<Secret> {
        self.namespaced()
    }

    pub fn services(&self) -> Api<Service> {
        self.namespaced()
    }

    pub fn snapshots(&self) -> Api<VolumeSnapshot> {
        self.namespaced()
    }

    pub fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }

    pub fn storage_classes(&self) -> Api<StorageClass> {
        Api::all(self.client.clone())
    }

    pub fn snapshot_classes(&self) -> Api<VolumeSnapshotClass> {
        Api::all(self.client.clone())
    }

    pub fn crds(&self) -> Api<CustomResourceDefinition> {
        Api::all(self.client.clone())
    }

    pub fn manifest(&self, relative: &str) -> PathBuf {
        self.config.manifest(relative)
    }

    /// Load a cluster-scoped fixture as is
    pub fn load<K: DeserializeOwned>(&self, relative: &str) -> Result<K> {
        manifest::load(&self.manifest(relative))
    }

    /// Load a namespaced fixture into the case namespace
    pub fn load_here<K>(&self, relative: &str) -> Result<K>
    where
        K: DeserializeOwned + Resource<Scope = NamespaceResourceScope>,
    {
        let mut obj: K = self.load(relative)?;
        obj.meta_mut().namespace = Some(self.namespace.clone());
        Ok(obj)
    }

    // =========================================================================
    // Claims and pods
    // =========================================================================

    /// Create a claim from a fixture and wait until it is bound
    pub async fn create_pvc(&self, relative: &str) -> Result<PersistentVolumeClaim> {
        let claim: PersistentVolumeClaim = self.load_here(relative)?;
        lifecycle::create_pvc_and_validate_pv(&self.pvcs(), &self.pvs(), &claim, &self.waiter).await?;
        Ok(claim)
    }

    pub async fn delete_pvc(&self, claim: &PersistentVolumeClaim) -> Result<()> {
        self.delete_pvc_named(&claim.name_any()).await
    }

    pub async fn delete_pvc_named(&self, name: &str) -> Result<()> {
        lifecycle::delete_pvc_and_validate_pv(&self.pvcs(), &self.pvs(), &self.namespace, name, &self.waiter).await
    }

    pub async fn expand_pvc(&self, claim: &PersistentVolumeClaim) -> Result<()> {
        lifecycle::expand_pvc(
            &self.pvcs(),
            &self.namespace,
            &claim.name_any(),
            &self.config.expand_size,
            &self.waiter,
        )
        .await
    }

    /// Create a pod from a fixture and wait until it runs
    pub async fn create_pod(&self, relative: &str) -> Result<Pod> {
        let pod: Pod = self.load_here(relative)?;
        lifecycle::create_pod(&self.pods(), &pod, &self.waiter).await?;
        Ok(pod)
    }

    pub async fn delete_pod(&self, pod: &Pod) -> Result<()> {
        lifecycle::delete_pod(&self.pods(), &self.namespace, &pod.name_any(), &self.waiter).await
    }

    pub async fn exec(&self, pod: &Pod, command: &str) -> Result<String> {
        lifecycle::exec_in_pod(&self.kubectl, pod, command).await
    }

    // =========================================================================
    // Storage classes
    // =========================================================================

    pub async fn create_rbd_storage_class(&self, options: &ClassOptions, overrides: &BTreeMap<String, String>) -> Result<()> {
        let template: StorageClass = self.load("rbd/storageclass.yaml")?;
        let sc = lifecycle::rbd_storage_class(template, &self.config, &self.cluster_id, options, overrides);
        lifecycle::create_storage_class(&self.storage_classes(), &sc, &self.waiter).await
    }

    pub async fn create_cephfs_storage_class(&self, enable_pool: bool, overrides: &BTreeMap<String, String>) -> Result<()> {
        let template: StorageClass = self.load("cephfs/storageclass.yaml")?;
        let sc = lifecycle::cephfs_storage_class(template, &self.config, &self.cluster_id, enable_pool, overrides);
        lifecycle::create_storage_class(&self.storage_classes(), &sc, &self.waiter).await
    }

    pub async fn delete_storage_class(&self, name: &str) -> Result<()> {
        lifecycle::delete_storage_class(&self.storage_classes(), name, &self.waiter).await
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    pub async fn snapshot_crds_installed(&self) -> Result<bool> {
        lifecycle::snapshot_crds_installed(&self.crds()).await
    }

    /// Create a snapshot class from a fixture, filling in the cluster ID
    pub async fn create_snapshot_class(&self, relative: &str) -> Result<()> {
        let mut class: VolumeSnapshotClass = self.load(relative)?;
        let cluster_id = class
            .parameters
            .entry(lifecycle::CLUSTER_ID_PARAM.to_string())
            .or_default();
        if cluster_id.is_empty() {
            *cluster_id = self.cluster_id.to_string();
        }
        lifecycle::create_snapshot_class(&self.snapshot_classes(), &class, &self.waiter).await
    }

    pub async fn delete_snapshot_class(&self, relative: &str) -> Result<()> {
        let class: VolumeSnapshotClass = self.load(relative)?;
        lifecycle::delete_snapshot_class(&self.snapshot_classes(), &class.name_any(), &self.waiter).await
    }

    /// Snapshot `claim` using a fixture and wait until it is ready
    pub async fn create_snapshot(&self, relative: &str, claim: &PersistentVolumeClaim) -> Result<VolumeSnapshot> {
        let mut snapshot: VolumeSnapshot = self.load_here(relative)?;
        snapshot.spec.source.persistent_volume_claim_name = Some(claim.name_any());
        lifecycle::create_snapshot(&self.snapshots(), &snapshot, &self.waiter).await?;
        Ok(snapshot)
    }

    pub async fn delete_snapshot(&self, snapshot: &VolumeSnapshot) -> Result<()> {
        lifecycle::delete_snapshot(&self.snapshots(), &self.namespace, &snapshot.name_any(), &self.waiter).await
    }

    // =========================================================================
    // Backend
    // =========================================================================

    pub async fn validate_rbd_image_count(&self, expected: usize) -> Result<()> {
        self.ceph.validate_rbd_image_count(&self.config.rbd.pool, expected).await
    }

    pub async fn validate_subvolume_count(&self, expected: usize) -> Result<()> {
        self.ceph
            .validate_subvolume_count(&self.config.cephfs.filesystem, &self.config.cephfs.subvolume_group, expected)
            .await
    }
}
