//! VolumeSnapshot and VolumeSnapshotClass lifecycle

use super::{create_object, delete_and_await_removal};
use crate::crd::{VolumeSnapshot, VolumeSnapshotClass, SNAPSHOT_CLASS_CRD};
use crate::domain::ports::{ResourceApi, ResourceRef};
use crate::error::Result;
use crate::poll::{condition_for, is_not_found, ConditionResult, Intent, Waiter};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::ResourceExt;
use tracing::{debug, info, warn};

/// Whether the external-snapshotter CRDs are installed
pub async fn snapshot_crds_installed(crds: &dyn ResourceApi<CustomResourceDefinition>) -> Result<bool> {
    match crds.get(SNAPSHOT_CLASS_CRD).await {
        Ok(_) => Ok(true),
        Err(err) if is_not_found(&err) => {
            info!("{} not installed", SNAPSHOT_CLASS_CRD);
            Ok(false)
        }
        Err(err) => Err(err.into()),
    }
}

pub async fn create_snapshot_class(
    api: &dyn ResourceApi<VolumeSnapshotClass>,
    class: &VolumeSnapshotClass,
    waiter: &Waiter,
) -> Result<()> {
    let resource = ResourceRef::cluster("VolumeSnapshotClass", &class.name_any());
    create_object(api, class, &resource, waiter).await?;
    Ok(())
}

pub async fn delete_snapshot_class(
    api: &dyn ResourceApi<VolumeSnapshotClass>,
    name: &str,
    waiter: &Waiter,
) -> Result<()> {
    let resource = ResourceRef::cluster("VolumeSnapshotClass", name);
    delete_and_await_removal(api, &resource, waiter).await
}

/// Create a snapshot and wait for it to be ready to use
pub async fn create_snapshot(api: &dyn ResourceApi<VolumeSnapshot>, snapshot: &VolumeSnapshot, waiter: &Waiter) -> Result<()> {
    let namespace = snapshot.namespace().unwrap_or_default();
    let name = snapshot.name_any();
    let resource = ResourceRef::namespaced("VolumeSnapshot", &namespace, &name);

    create_object(api, snapshot, &resource, waiter).await?;
    info!("Waiting for {} to be ready", resource);

    let name = name.as_str();
    waiter
        .until("snapshot", &resource, move || async move {
            let current = match api.get(name).await {
                Ok(s) => s,
                Err(err) => return condition_for(err, Intent::Create),
            };
            if current.is_ready() {
                return ConditionResult::Satisfied;
            }
            match current.error_message() {
                Some(message) => warn!("Snapshot {} reports: {}", name, message),
                None => debug!("Snapshot {} not ready yet", name),
            }
            ConditionResult::Pending
        })
        .await
}

pub async fn delete_snapshot(api: &dyn ResourceApi<VolumeSnapshot>, namespace: &str, name: &str, waiter: &Waiter) -> Result<()> {
    let resource = ResourceRef::namespaced("VolumeSnapshot", namespace, name);
    delete_and_await_removal(api, &resource, waiter).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::{api_error, FakeApi};
    use crate::crd::{VolumeSnapshotSource, VolumeSnapshotSpec, VolumeSnapshotStatus};
    use crate::lifecycle::testing::waiter;
    use kube::api::ObjectMeta;

    fn snapshot() -> VolumeSnapshot {
        let mut snap = VolumeSnapshot::new(
            "rbd-pvc-snapshot",
            VolumeSnapshotSpec {
                volume_snapshot_class_name: Some("csi-rbdplugin-snapclass".to_string()),
                source: VolumeSnapshotSource {
                    persistent_volume_claim_name: Some("rbd-pvc".to_string()),
                    ..Default::default()
                },
            },
        );
        snap.metadata.namespace = Some("rbd-1".to_string());
        snap
    }

    #[tokio::test]
    async fn test_crd_presence() {
        let crds: FakeApi<CustomResourceDefinition> = FakeApi::new();
        assert!(!snapshot_crds_installed(&crds).await.unwrap());

        crds.insert(CustomResourceDefinition {
            metadata: ObjectMeta {
                name: Some(SNAPSHOT_CLASS_CRD.to_string()),
                ..Default::default()
            },
            ..Default::default()
        });
        assert!(snapshot_crds_installed(&crds).await.unwrap());

        crds.fail_next("get", api_error(403, "Forbidden", "forbidden"));
        assert!(snapshot_crds_installed(&crds).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_waits_for_ready() {
        let snaps = FakeApi::new();
        let reads = std::sync::atomic::AtomicUsize::new(0);
        snaps.on_get(move |s: &mut VolumeSnapshot| {
            if reads.fetch_add(1, std::sync::atomic::Ordering::SeqCst) >= 1 {
                s.status = Some(VolumeSnapshotStatus {
                    ready_to_use: Some(true),
                    ..Default::default()
                });
            }
        });

        create_snapshot(&snaps, &snapshot(), &waiter(60)).await.unwrap();
        assert_eq!(snaps.calls("get"), 2);

        delete_snapshot(&snaps, "rbd-1", "rbd-pvc-snapshot", &waiter(60)).await.unwrap();
        assert!(!snaps.contains("rbd-pvc-snapshot"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_class_lifecycle() {
        let classes = FakeApi::new();
        let class = VolumeSnapshotClass {
            metadata: ObjectMeta {
                name: Some("csi-rbdplugin-snapclass".to_string()),
                ..Default::default()
            },
            driver: "rook-ceph.rbd.csi.ceph.com".to_string(),
            ..Default::default()
        };

        create_snapshot_class(&classes, &class, &waiter(30)).await.unwrap();
        assert!(classes.contains("csi-rbdplugin-snapclass"));
        delete_snapshot_class(&classes, "csi-rbdplugin-snapclass", &waiter(30)).await.unwrap();
        assert!(!classes.contains("csi-rbdplugin-snapclass"));
    }
}
