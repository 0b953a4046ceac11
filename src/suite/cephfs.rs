//! CephFS suite
//!
//! Volumes are subvolumes in the configured group; their count is checked
//! after each step.

use super::checks::{read_test_data, validate_volume_size, write_test_data};
use super::{Case, Context, Framework, Suite};
use crate::error::Result;
use futures::future::{FutureExt, LocalBoxFuture};
use std::collections::BTreeMap;

const SNAPSHOT_CLASS: &str = "cephfs/snapshotclass.yaml";

pub fn suite() -> Suite<Framework> {
    Suite::new("Cephfs", "cephfs")
        .context(
            Context::new("[GA]")
                .before_each(create_class)
                .after_each(delete_class)
                .case(Case::run(
                    "should be able to dynamically provision File mode RWO volume",
                    &["cephfs", "pvc", "rwo"],
                    rwo,
                ))
                .case(Case::run(
                    "should be able to dynamically provision File mode RWX volume",
                    &["cephfs", "pvc", "rwx"],
                    rwx,
                ))
                .case(Case::run(
                    "should be able to provision volume from another volume",
                    &["cephfs", "clone"],
                    clone_volume,
                ))
                .case(Case::pending(
                    "should be able to collect metrics of File mode volume",
                    &["cephfs", "metrics"],
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
                    &["cephfs", "snapshot"],
                    restore_from_snapshot,
                )),
        )
        .context(
            Context::new("[Beta]")
                .before_each(create_class)
                .after_each(delete_class)
                .case(Case::run(
                    "should be able to expand volume",
                    &["cephfs", "beta", "expansion"],
                    expansion,
                )),
        )
}

// =============================================================================
// Hooks
// =============================================================================

fn create_class(f: &Framework) -> LocalBoxFuture<'_, Result<()>> {
    async move { f.create_cephfs_storage_class(true, &BTreeMap::new()).await }.boxed_local()
}

fn delete_class(f: &Framework) -> LocalBoxFuture<'_, Result<()>> {
    async move { f.delete_storage_class(&f.config.cephfs.storage_class).await }.boxed_local()
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
        f.create_cephfs_storage_class(true, &BTreeMap::new()).await?;
        f.create_snapshot_class(SNAPSHOT_CLASS).await
    }
    .boxed_local()
}

fn delete_class_and_snapshot_class(f: &Framework) -> LocalBoxFuture<'_, Result<()>> {
    async move {
        let class = f.delete_storage_class(&f.config.cephfs.storage_class).await;
        let snapshot_class = f.delete_snapshot_class(SNAPSHOT_CLASS).await;
        class.and(snapshot_class)
    }
    .boxed_local()
}

// =============================================================================
// Cases
// =============================================================================

fn rwo(f: &Framework) -> LocalBoxFuture<'_, Result<()>> {
    async move {
        let pvc = f.create_pvc("cephfs/rwo-pvc.yaml").await?;
        let pod = f.create_pod("cephfs/rwo-pod.yaml").await?;
        f.validate_subvolume_count(1).await?;

        f.delete_pod(&pod).await?;
        f.delete_pvc(&pvc).await?;
        f.validate_subvolume_count(0).await
    }
    .boxed_local()
}

fn rwx(f: &Framework) -> LocalBoxFuture<'_, Result<()>> {
    async move {
        let pvc = f.create_pvc("cephfs/rwx-pvc.yaml").await?;
        let pod = f.create_pod("cephfs/rwx-pod.yaml").await?;
        let another = f.create_pod("cephfs/rwx-pod-another.yaml").await?;
        f.validate_subvolume_count(1).await?;

        write_test_data(&f.kubectl, &pod).await?;
        read_test_data(&f.kubectl, &another).await?;

        f.delete_pod(&pod).await?;
        f.delete_pod(&another).await?;
        f.delete_pvc(&pvc).await?;
        f.validate_subvolume_count(0).await
    }
    .boxed_local()
}

/// Unlike RBD, a CephFS clone leaves no parent behind
fn clone_volume(f: &Framework) -> LocalBoxFuture<'_, Result<()>> {
    async move {
        let pvc = f.create_pvc("cephfs/rwx-pvc.yaml").await?;
        let pod = f.create_pod("cephfs/rwx-pod.yaml").await?;
        f.validate_subvolume_count(1).await?;

        let clone_pvc = f.create_pvc("cephfs/pvc-clone.yaml").await?;
        let clone_pod = f.create_pod("cephfs/pod-clone.yaml").await?;
        f.validate_subvolume_count(2).await?;

        f.delete_pod(&pod).await?;
        f.delete_pod(&clone_pod).await?;
        f.delete_pvc(&pvc).await?;
        f.delete_pvc(&clone_pvc).await?;
        f.validate_subvolume_count(0).await
    }
    .boxed_local()
}

/// Snapshots live inside the source subvolume, which stays until the
/// snapshot is gone
fn restore_from_snapshot(f: &Framework) -> LocalBoxFuture<'_, Result<()>> {
    async move {
        let pvc = f.create_pvc("cephfs/rwx-pvc.yaml").await?;
        let pod = f.create_pod("cephfs/rwx-pod.yaml").await?;
        f.validate_subvolume_count(1).await?;

        let snapshot = f.create_snapshot("cephfs/snapshot.yaml", &pvc).await?;
        f.validate_subvolume_count(1).await?;

        f.delete_pod(&pod).await?;
        f.delete_pvc(&pvc).await?;
        f.validate_subvolume_count(1).await?;

        let restored = f.create_pvc("cephfs/pvc-restore.yaml").await?;
        let restored_pod = f.create_pod("cephfs/pod-restore.yaml").await?;
        f.validate_subvolume_count(2).await?;

        f.delete_snapshot(&snapshot).await?;
        f.validate_subvolume_count(1).await?;

        f.delete_pod(&restored_pod).await?;
        f.delete_pvc(&restored).await?;
        f.validate_subvolume_count(0).await
    }
    .boxed_local()
}

fn expansion(f: &Framework) -> LocalBoxFuture<'_, Result<()>> {
    async move {
        let pvc = f.create_pvc("cephfs/rwx-pvc.yaml").await?;
        let pod = f.create_pod("cephfs/rwx-pod.yaml").await?;
        f.validate_subvolume_count(1).await?;
        validate_volume_size(&f.kubectl, &pod, 900).await?;

        f.expand_pvc(&pvc).await?;
        f.validate_subvolume_count(1).await?;
        validate_volume_size(&f.kubectl, &pod, 1800).await?;

        f.delete_pod(&pod).await?;
        f.delete_pvc(&pvc).await?;
        f.validate_subvolume_count(0).await
    }
    .boxed_local()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::CaseBody;

    #[test]
    fn test_every_case_is_labelled_cephfs() {
        let suite = suite();
        let cases: Vec<_> = suite.contexts.iter().flat_map(|c| c.cases.iter()).collect();
        assert_eq!(cases.len(), 6);
        assert!(cases.iter().all(|c| c.labels.contains(&"cephfs")));

        let pending: Vec<_> = cases
            .iter()
            .filter(|c| matches!(c.body, CaseBody::Pending(_)))
            .map(|c| c.name)
            .collect();
        assert_eq!(pending, ["should be able to collect metrics of File mode volume"]);
    }
}
