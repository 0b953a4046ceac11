//! Custom resource types the suite talks to
//!
//! The CSI snapshot API is not part of k8s-openapi:
//! - VolumeSnapshot: namespaced snapshot of a claim
//! - VolumeSnapshotClass: cluster-scoped snapshot parameters

pub mod snapshot;

pub use snapshot::*;
