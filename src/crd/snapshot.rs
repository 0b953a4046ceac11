//! VolumeSnapshot and VolumeSnapshotClass
//!
//! Typed mirrors of the external-snapshotter `snapshot.storage.k8s.io/v1`
//! API. Only the fields the suite reads or writes are modelled.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

pub const SNAPSHOT_GROUP: &str = "snapshot.storage.k8s.io";
pub const SNAPSHOT_VERSION: &str = "v1";

/// Name of the CRD whose presence gates the snapshot cases
pub const SNAPSHOT_CLASS_CRD: &str = "volumesnapshotclasses.snapshot.storage.k8s.io";

// =============================================================================
// VolumeSnapshot
// =============================================================================

/// Point-in-time copy of a claim
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "snapshot.storage.k8s.io",
    version = "v1",
    kind = "VolumeSnapshot",
    plural = "volumesnapshots",
    status = "VolumeSnapshotStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotSpec {
    /// Class to snapshot with; the cluster default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_class_name: Option<String>,

    pub source: VolumeSnapshotSource,
}

/// Exactly one of the two fields is set
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_content_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotStatus {
    #[serde(default)]
    pub bound_volume_snapshot_content_name: Option<String>,

    #[serde(default)]
    pub creation_time: Option<String>,

    #[serde(default)]
    pub ready_to_use: Option<bool>,

    #[serde(default)]
    pub restore_size: Option<String>,

    #[serde(default)]
    pub error: Option<VolumeSnapshotError>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotError {
    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub time: Option<String>,
}

impl VolumeSnapshot {
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.ready_to_use)
            .unwrap_or(false)
    }

    /// Error reported by the snapshot controller, if any
    pub fn error_message(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.error.as_ref())
            .and_then(|e| e.message.as_deref())
    }
}

// =============================================================================
// VolumeSnapshotClass
// =============================================================================

/// Cluster-scoped snapshot class.
///
/// Its fields sit at the top level instead of under `spec`, so the
/// `Resource` impl is written by hand.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotClass {
    #[serde(default = "snapshot_api_version")]
    pub api_version: String,

    #[serde(default = "snapshot_class_kind")]
    pub kind: String,

    #[serde(default)]
    pub metadata: ObjectMeta,

    pub driver: String,

    #[serde(default = "default_deletion_policy")]
    pub deletion_policy: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

fn snapshot_api_version() -> String {
    format!("{}/{}", SNAPSHOT_GROUP, SNAPSHOT_VERSION)
}

fn snapshot_class_kind() -> String {
    "VolumeSnapshotClass".to_string()
}

fn default_deletion_policy() -> String {
    "Delete".to_string()
}

impl kube::Resource for VolumeSnapshotClass {
    type DynamicType = ();
    type Scope = k8s_openapi::ClusterResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        Cow::Borrowed("VolumeSnapshotClass")
    }

    fn group(_: &()) -> Cow<'_, str> {
        Cow::Borrowed(SNAPSHOT_GROUP)
    }

    fn version(_: &()) -> Cow<'_, str> {
        Cow::Borrowed(SNAPSHOT_VERSION)
    }

    fn plural(_: &()) -> Cow<'_, str> {
        Cow::Borrowed("volumesnapshotclasses")
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::{Resource, ResourceExt};

    #[test]
    fn test_snapshot_from_yaml() {
        let yaml = r#"
apiVersion: snapshot.storage.k8s.io/v1
kind: VolumeSnapshot
metadata:
  name: rbd-pvc-snapshot
spec:
  volumeSnapshotClassName: csi-rbdplugin-snapclass
  source:
    persistentVolumeClaimName: rbd-pvc
status:
  readyToUse: true
  restoreSize: 1Gi
"#;
        let snap: VolumeSnapshot = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(snap.name_any(), "rbd-pvc-snapshot");
        assert_eq!(snap.spec.source.persistent_volume_claim_name.as_deref(), Some("rbd-pvc"));
        assert!(snap.is_ready());
        assert_eq!(snap.error_message(), None);
    }

    #[test]
    fn test_snapshot_not_ready_without_status() {
        let snap = VolumeSnapshot::new("s", VolumeSnapshotSpec::default());
        assert!(!snap.is_ready());
        assert_eq!(VolumeSnapshot::plural(&()), "volumesnapshots");
    }

    #[test]
    fn test_snapshot_class_from_yaml() {
        let yaml = r#"
apiVersion: snapshot.storage.k8s.io/v1
kind: VolumeSnapshotClass
metadata:
  name: csi-rbdplugin-snapclass
driver: rook-ceph.rbd.csi.ceph.com
parameters:
  clusterID: rook-ceph
deletionPolicy: Delete
"#;
        let class: VolumeSnapshotClass = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(class.name_any(), "csi-rbdplugin-snapclass");
        assert_eq!(class.driver, "rook-ceph.rbd.csi.ceph.com");
        assert_eq!(class.parameters.get("clusterID").map(String::as_str), Some("rook-ceph"));
        assert_eq!(VolumeSnapshotClass::api_version(&()), "snapshot.storage.k8s.io/v1");
        assert_eq!(VolumeSnapshotClass::plural(&()), "volumesnapshotclasses");
    }
}
