//! Test suites and their runner
//!
//! A suite is a list of contexts; a context shares before/after hooks and
//! an optional skip guard across its cases. Every case gets its own
//! namespace and its own `Framework`.
//!
//! ```text
//! Suite ─┬─ Context "[GA] [PVC]" ── before_each / after_each
//!        │     ├─ Case (labels) ── Run(body) | Pending(reason)
//!        │     └─ ...
//!        └─ Context "[Beta]" ...
//! ```

pub mod cephfs;
pub mod checks;
pub mod elasticsearch;
pub mod framework;
pub mod rbd;
pub mod runner;

pub use framework::*;
pub use runner::*;

use crate::error::Result;
use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Case Definitions
// =============================================================================

/// Hook or case body run against a per-case context
pub type Step<C> = for<'a> fn(&'a C) -> LocalBoxFuture<'a, Result<()>>;

/// Returns a skip reason when the context's cases cannot run
pub type Guard<C> = for<'a> fn(&'a C) -> LocalBoxFuture<'a, Result<Option<String>>>;

pub enum CaseBody<C> {
    Run(Step<C>),
    /// Declared but not implemented; reported without running
    Pending(&'static str),
}

pub struct Case<C> {
    pub name: &'static str,
    pub labels: &'static [&'static str],
    pub body: CaseBody<C>,
}

impl<C> Case<C> {
    pub fn run(name: &'static str, labels: &'static [&'static str], body: Step<C>) -> Self {
        Self {
            name,
            labels,
            body: CaseBody::Run(body),
        }
    }

    pub fn pending(name: &'static str, labels: &'static [&'static str], reason: &'static str) -> Self {
        Self {
            name,
            labels,
            body: CaseBody::Pending(reason),
        }
    }
}

/// Cases sharing setup and teardown
pub struct Context<C> {
    pub name: &'static str,
    pub skip_unless: Option<Guard<C>>,
    pub before_each: Option<Step<C>>,
    pub after_each: Option<Step<C>>,
    pub cases: Vec<Case<C>>,
}

impl<C> Context<C> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            skip_unless: None,
            before_each: None,
            after_each: None,
            cases: Vec::new(),
        }
    }

    pub fn skip_unless(mut self, guard: Guard<C>) -> Self {
        self.skip_unless = Some(guard);
        self
    }

    pub fn before_each(mut self, step: Step<C>) -> Self {
        self.before_each = Some(step);
        self
    }

    pub fn after_each(mut self, step: Step<C>) -> Self {
        self.after_each = Some(step);
        self
    }

    pub fn case(mut self, case: Case<C>) -> Self {
        self.cases.push(case);
        self
    }
}

pub struct Suite<C> {
    pub name: &'static str,
    /// Prefix of the per-case namespaces
    pub namespace_base: &'static str,
    pub contexts: Vec<Context<C>>,
}

impl<C> Suite<C> {
    pub fn new(name: &'static str, namespace_base: &'static str) -> Self {
        Self {
            name,
            namespace_base,
            contexts: Vec::new(),
        }
    }

    pub fn context(mut self, context: Context<C>) -> Self {
        self.contexts.push(context);
        self
    }
}

// =============================================================================
// Suite Selection
// =============================================================================

/// Suites shipped with the binary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SuiteKind {
    Rbd,
    Cephfs,
    Es,
}

impl SuiteKind {
    pub fn build(self) -> Suite<Framework> {
        match self {
            SuiteKind::Rbd => rbd::suite(),
            SuiteKind::Cephfs => cephfs::suite(),
            SuiteKind::Es => elasticsearch::suite(),
        }
    }
}

impl fmt::Display for SuiteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuiteKind::Rbd => write!(f, "rbd"),
            SuiteKind::Cephfs => write!(f, "cephfs"),
            SuiteKind::Es => write!(f, "es"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_suites_are_well_formed() {
        for kind in [SuiteKind::Rbd, SuiteKind::Cephfs, SuiteKind::Es] {
            let suite = kind.build();
            assert!(!suite.contexts.is_empty(), "{} has no contexts", kind);
            for context in &suite.contexts {
                assert!(!context.cases.is_empty(), "{} / {} has no cases", kind, context.name);
            }
        }
    }

    #[test]
    fn test_metrics_cases_are_pending() {
        let suite = rbd::suite();
        let metrics: Vec<_> = suite
            .contexts
            .iter()
            .flat_map(|c| c.cases.iter())
            .filter(|c| c.labels.contains(&"metrics"))
            .collect();
        assert_eq!(metrics.len(), 2);
        assert!(metrics.iter().all(|c| matches!(c.body, CaseBody::Pending(_))));
    }

    #[test]
    fn test_shipped_fixtures_parse() {
        use crate::crd::{VolumeSnapshot, VolumeSnapshotClass};
        use crate::manifest::load;
        use k8s_openapi::api::apps::v1::StatefulSet;
        use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
        use k8s_openapi::api::storage::v1::StorageClass;
        use std::path::Path;

        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("manifest");
        for driver in ["rbd", "cephfs"] {
            let sc: StorageClass = load(&dir.join(driver).join("storageclass.yaml")).unwrap();
            assert!(sc.parameters.unwrap().contains_key("clusterID"));
            let class: VolumeSnapshotClass = load(&dir.join(driver).join("snapshotclass.yaml")).unwrap();
            assert!(class.driver.ends_with(".csi.ceph.com"));
            let snap: VolumeSnapshot = load(&dir.join(driver).join("snapshot.yaml")).unwrap();
            assert!(snap.spec.source.persistent_volume_claim_name.is_some());
        }

        for claim in [
            "rbd/block-rwo-pvc.yaml",
            "rbd/block-rwx-pvc.yaml",
            "rbd/file-rwo-pvc.yaml",
            "rbd/file-pvc-clone.yaml",
            "rbd/block-pvc-clone.yaml",
            "rbd/pvc-restore.yaml",
            "cephfs/rwo-pvc.yaml",
            "cephfs/rwx-pvc.yaml",
            "cephfs/pvc-clone.yaml",
            "cephfs/pvc-restore.yaml",
        ] {
            let pvc: PersistentVolumeClaim = load(&dir.join(claim)).unwrap();
            assert!(pvc.metadata.name.is_some(), "{}", claim);
        }

        for pod in [
            "rbd/block-rwo-pod.yaml",
            "rbd/block-rwx-pod.yaml",
            "rbd/block-rwx-pod-another.yaml",
            "rbd/block-pod-clone.yaml",
            "rbd/file-rwo-pod.yaml",
            "rbd/file-pod-clone.yaml",
            "rbd/pod-restore.yaml",
            "cephfs/rwo-pod.yaml",
            "cephfs/rwx-pod.yaml",
            "cephfs/rwx-pod-another.yaml",
            "cephfs/pod-clone.yaml",
            "cephfs/pod-restore.yaml",
        ] {
            let pod: Pod = load(&dir.join(pod)).unwrap();
            assert_eq!(pod.spec.unwrap().containers.len(), 1);
        }

        let set: StatefulSet = load(&dir.join("rbd/statefulset.yaml")).unwrap();
        assert_eq!(rbd::statefulset_claim_names(&set), ["data-web-0", "data-web-1"]);
    }
}
