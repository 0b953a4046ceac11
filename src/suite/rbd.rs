//! RBD suite
//!
//! Every case checks the RBD image count in the pool after each step, so a
//! leaked or missing image fails the case even when Kubernetes looks fine.

use super::checks::{validate_block_device, validate_volume_size};
use super::{Case, Context, Framework, Suite};
use crate::error::Result;
use crate::lifecycle::{self, ClassOptions};
use futures::future::{FutureExt, LocalBoxFuture};
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::info;

const SNAPSHOT_CLASS: &str = "rbd/snapshotclass.yaml";

pub fn suite() -> Suite<Framework> {
    Suite::new("Rbd", "rbd")
        .context(
            Context::new("[GA] [PVC]")
                .before_each(create_class)
                .after_each(delete_class)
                .case(Case::run(
                    "should be able to dynamically provision Block mode RWO volume",
                    &["pvc"],
                    block_rwo,
                ))
                .case(Case::run(
                    "should be able to dynamically provision Block mode RWX volume",
                    &["rdb", "pvc", "rwx"],
                    block_rwx,
                ))
                .case(Case::run(
                    "should be able to dynamically provision File mode RWO volume",
                    &["pvc"],
                    file_rwo,
                ))
                .case(Case::run(
                    "[clone] should be able to provision File mode RWO volume from another volume",
                    &["clone"],
                    file_clone,
                ))
                .case(Case::run(
                    "[clone] should be able to provision Block mode RWO volume from another volume",
                    &["clone"],
                    block_clone,
                ))
                .case(Case::pending(
                    "should be able to collect metrics of Block mode volume",
                    &["metrics"],
                    "Not implemented",
                ))
                .case(Case::pending(
                    "should be able to collect metrics of File mode volume",
                    &["metrics"],
                    "Not implemented",
                )),
        )
        .context(
            Context::new("[GA] [snapshot]")
                .skip_unless(snapshots_supported)
                .before_each(create_class_and_snapshot_class)
                .after_each(delete_class_and_snapshot_class)
                .case(Case::run(
                    "should be able to provision volume from snapshot",
                    &["snapshot"],
                    restore_from_snapshot,
                )),
        )
        .context(
            Context::new("[GA] [statefulset]")
                .before_each(create_class)
                .after_each(delete_class)
                .case(Case::run(
                    "should be able to provision volumes for a StatefulSet",
                    &["pvc", "statefulset"],
                    statefulset,
                )),
        )
        .context(
            Context::new("[Beta]")
                .before_each(create_class)
                .after_each(delete_class)
                .case(Case::run(
                    "should be able to expand volume",
                    &["rbd", "beta", "expansion"],
                    expansion,
                )),
        )
}

// =============================================================================
// Hooks
// =============================================================================

fn create_class(f: &Framework) -> LocalBoxFuture<'_, Result<()>> {
    async move {
        f.create_rbd_storage_class(&ClassOptions::default(), &BTreeMap::new())
            .await
    }
    .boxed_local()
}

fn delete_class(f: &Framework) -> LocalBoxFuture<'_, Result<()>> {
    async move { f.delete_storage_class(&f.config.rbd.storage_class).await }.boxed_local()
}

fn snapshots_supported(f: &Framework) -> LocalBoxFuture<'_, Result<Option<String>>> {
    async move {
        let installed = f.snapshot_crds_installed().await?;
        Ok((!installed).then(|| "snapshot CRDs are not installed".to_string()))
    }
    .boxed_local()
}

fn create_class_and_snapshot_class(f: &Framework) -> LocalBoxFuture<'_, Result<()>> {
    async move {
        f.create_rbd_storage_class(&ClassOptions::default(), &BTreeMap::new())
            .await?;
        f.create_snapshot_class(SNAPSHOT_CLASS).await
    }
    .boxed_local()
}

fn delete_class_and_snapshot_class(f: &Framework) -> LocalBoxFuture<'_, Result<()>> {
    async move {
        let class = f.delete_storage_class(&f.config.rbd.storage_class).await;
        let snapshot_class = f.delete_snapshot_class(SNAPSHOT_CLASS).await;
        class.and(snapshot_class)
    }
    .boxed_local()
}

// =============================================================================
// Cases
// =============================================================================

fn block_rwo(f: &Framework) -> LocalBoxFuture<'_, Result<()>> {
    rwo_volume(f, "rbd/block-rwo-pvc.yaml", "rbd/block-rwo-pod.yaml").boxed_local()
}

fn file_rwo(f: &Framework) -> LocalBoxFuture<'_, Result<()>> {
    rwo_volume(f, "rbd/file-rwo-pvc.yaml", "rbd/file-rwo-pod.yaml").boxed_local()
}

fn block_rwx(f: &Framework) -> LocalBoxFuture<'_, Result<()>> {
    rwx_block_volume(
        f,
        "rbd/block-rwx-pvc.yaml",
        "rbd/block-rwx-pod.yaml",
        "rbd/block-rwx-pod-another.yaml",
    )
    .boxed_local()
}

fn file_clone(f: &Framework) -> LocalBoxFuture<'_, Result<()>> {
    volume_clone(
        f,
        ["rbd/file-rwo-pvc.yaml", "rbd/file-rwo-pod.yaml"],
        ["rbd/file-pvc-clone.yaml", "rbd/file-pod-clone.yaml"],
    )
    .boxed_local()
}

fn block_clone(f: &Framework) -> LocalBoxFuture<'_, Result<()>> {
    volume_clone(
        f,
        ["rbd/block-rwo-pvc.yaml", "rbd/block-rwo-pod.yaml"],
        ["rbd/block-pvc-clone.yaml", "rbd/block-pod-clone.yaml"],
    )
    .boxed_local()
}

fn restore_from_snapshot(f: &Framework) -> LocalBoxFuture<'_, Result<()>> {
    volume_from_snapshot(f).boxed_local()
}

fn expansion(f: &Framework) -> LocalBoxFuture<'_, Result<()>> {
    volume_expansion(f, "rbd/file-rwo-pvc.yaml", "rbd/file-rwo-pod.yaml").boxed_local()
}

fn statefulset(f: &Framework) -> LocalBoxFuture<'_, Result<()>> {
    statefulset_volumes(f, "rbd/statefulset.yaml").boxed_local()
}

// =============================================================================
// Flows
// =============================================================================

async fn rwo_volume(f: &Framework, pvc_path: &str, pod_path: &str) -> Result<()> {
    let pvc = f.create_pvc(pvc_path).await?;
    let pod = f.create_pod(pod_path).await?;
    f.validate_rbd_image_count(1).await?;

    f.delete_pod(&pod).await?;
    f.delete_pvc(&pvc).await?;
    f.validate_rbd_image_count(0).await
}

async fn rwx_block_volume(f: &Framework, pvc_path: &str, pod_path: &str, another_pod_path: &str) -> Result<()> {
    let pvc = f.create_pvc(pvc_path).await?;
    let pod = f.create_pod(pod_path).await?;
    let another = f.create_pod(another_pod_path).await?;
    f.validate_rbd_image_count(1).await?;

    validate_block_device(&f.kubectl, &pod).await?;
    validate_block_device(&f.kubectl, &another).await?;

    f.delete_pod(&pod).await?;
    f.delete_pod(&another).await?;
    f.delete_pvc(&pvc).await?;
    f.validate_rbd_image_count(0).await
}

/// A clone is a new image that keeps a hidden parent image, hence three
async fn volume_clone(f: &Framework, parent: [&str; 2], clone: [&str; 2]) -> Result<()> {
    let pvc = f.create_pvc(parent[0]).await?;
    let pod = f.create_pod(parent[1]).await?;
    f.validate_rbd_image_count(1).await?;

    let clone_pvc = f.create_pvc(clone[0]).await?;
    let clone_pod = f.create_pod(clone[1]).await?;
    f.validate_rbd_image_count(3).await?;

    f.delete_pod(&pod).await?;
    f.delete_pod(&clone_pod).await?;
    f.delete_pvc(&pvc).await?;
    f.delete_pvc(&clone_pvc).await?;
    f.validate_rbd_image_count(0).await
}

async fn volume_from_snapshot(f: &Framework) -> Result<()> {
    let pvc = f.create_pvc("rbd/file-rwo-pvc.yaml").await?;
    let pod = f.create_pod("rbd/file-rwo-pod.yaml").await?;
    f.validate_rbd_image_count(1).await?;

    let snapshot = f.create_snapshot("rbd/snapshot.yaml", &pvc).await?;
    f.validate_rbd_image_count(2).await?;

    f.delete_pod(&pod).await?;
    f.delete_pvc(&pvc).await?;
    f.validate_rbd_image_count(1).await?;

    let restored = f.create_pvc("rbd/pvc-restore.yaml").await?;
    let restored_pod = f.create_pod("rbd/pod-restore.yaml").await?;
    f.validate_rbd_image_count(2).await?;

    f.delete_snapshot(&snapshot).await?;
    f.validate_rbd_image_count(1).await?;

    f.delete_pod(&restored_pod).await?;
    f.delete_pvc(&restored).await?;
    f.validate_rbd_image_count(0).await
}

async fn volume_expansion(f: &Framework, pvc_path: &str, pod_path: &str) -> Result<()> {
    let pvc = f.create_pvc(pvc_path).await?;
    let pod = f.create_pod(pod_path).await?;
    f.validate_rbd_image_count(1).await?;
    validate_volume_size(&f.kubectl, &pod, 900).await?;

    f.expand_pvc(&pvc).await?;
    f.validate_rbd_image_count(1).await?;
    validate_volume_size(&f.kubectl, &pod, 1800).await?;

    f.delete_pod(&pod).await?;
    f.delete_pvc(&pvc).await?;
    f.validate_rbd_image_count(0).await
}

/// Claim names the controller derives from the volume claim templates
pub fn statefulset_claim_names(set: &StatefulSet) -> Vec<String> {
    let replicas = lifecycle::desired_replicas(set).max(0);
    let templates = set
        .spec
        .as_ref()
        .and_then(|s| s.volume_claim_templates.as_ref())
        .map(|t| t.iter().map(|c| c.name_any()).collect::<Vec<_>>())
        .unwrap_or_default();

    templates
        .iter()
        .flat_map(|template| (0..replicas).map(move |i| format!("{}-{}-{}", template, set.name_any(), i)))
        .collect()
}

async fn statefulset_volumes(f: &Framework, path: &str) -> Result<()> {
    let set: StatefulSet = f.load_here(path)?;
    let claims = statefulset_claim_names(&set);

    lifecycle::create_statefulset(&f.statefulsets(), &f.pods(), &set, &f.waiter).await?;
    f.validate_rbd_image_count(claims.len()).await?;

    lifecycle::delete_statefulset(&f.statefulsets(), &f.namespace, &set.name_any(), &f.waiter).await?;
    // Claims created from templates outlive the set
    info!("Deleting {} claim(s) of {}", claims.len(), set.name_any());
    for claim in &claims {
        f.delete_pvc_named(claim).await?;
    }
    f.validate_rbd_image_count(0).await
}
