//! csi-e2e - End-to-end tests for Ceph CSI on Kubernetes
//!
//! Drives a live cluster through the lifecycle of CSI-provisioned volumes
//! (claims, pods, snapshots, clones, expansion, StatefulSets and a sample
//! application) and checks the Ceph backend after every step.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                      Suites  (rbd / cephfs / es)                      │
//! │            contexts, hooks, labels, per-case namespaces              │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                        Lifecycle Orchestrators                        │
//! │   namespace │ storage class │ pvc │ pod │ snapshot │ sts │ kubectl    │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                 Waiter ── Condition Poller ── Classifiers             │
//! │            (API errors, kubectl output → retry / done / fatal)       │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │   ResourceApi<K> (kube::Api)      │     CommandRunner (tokio process) │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`poll`]: condition poller, waiter and error classification
//! - [`lifecycle`]: create/delete/await orchestrators per resource kind
//! - [`backend`]: Ceph cluster ID and RBD image / subvolume inspection
//! - [`suite`]: suites, the per-case framework and the runner
//! - [`cluster`]: adapters for the cluster and command ports
//! - [`crd`]: snapshot custom resources
//! - [`domain`]: ports shared by all layers
//! - [`error`]: error types and handling

pub mod backend;
pub mod cluster;
pub mod config;
pub mod crd;
pub mod domain;
pub mod error;
pub mod lifecycle;
pub mod manifest;
pub mod poll;
pub mod suite;

// Re-export commonly used types
pub use backend::{resolve_cluster_id, CephInspector, ClusterId};

pub use cluster::ProcessRunner;

pub use config::{CephFsConfig, E2eConfig, RbdConfig};

pub use domain::ports::{CommandOutput, CommandRunner, ResourceApi, ResourceRef};

pub use error::{Error, Result};

pub use poll::{poll_until, ConditionResult, Intent, PollOutcome, PollSpec, Waiter};

pub use suite::{CaseFilter, Environment, Framework, RunReport, Runner, SuiteKind};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
