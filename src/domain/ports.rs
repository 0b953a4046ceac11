//! Domain Ports - the two collaborators every orchestrator talks to
//!
//! The suite never owns cluster or backend state. It reads it through
//! `ResourceApi` (the Kubernetes API) and `CommandRunner` (external CLI
//! tools such as `kubectl`, `rbd` and `ceph`). Adapters in `cluster`
//! implement both for the real world; tests swap in in-memory fakes.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Resource Reference
// =============================================================================

/// Identifies the cluster object an orchestrator is waiting on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Object kind, e.g. `PersistentVolumeClaim`
    pub kind: String,
    /// Namespace, `None` for cluster-scoped objects
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ResourceRef {
    /// Reference to a namespaced object
    pub fn namespaced(kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        }
    }

    /// Reference to a cluster-scoped object
    pub fn cluster(kind: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            namespace: None,
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

// =============================================================================
// Cluster API Port
// =============================================================================

/// Port for CRUD operations on one kind of cluster object.
///
/// A handle is already scoped (namespaced or cluster-wide), mirroring
/// `kube::Api`. Errors are returned raw so the classifier can inspect the
/// status code.
#[async_trait]
pub trait ResourceApi<K>: Send + Sync {
    /// Submit a new object
    async fn create(&self, obj: &K) -> std::result::Result<K, kube::Error>;

    /// Fetch the current state of an object
    async fn get(&self, name: &str) -> std::result::Result<K, kube::Error>;

    /// Request deletion of an object
    async fn delete(&self, name: &str) -> std::result::Result<(), kube::Error>;

    /// Apply a JSON merge patch
    async fn patch(
        &self,
        name: &str,
        patch: &serde_json::Value,
    ) -> std::result::Result<K, kube::Error>;

    /// List objects, optionally filtered by label selector
    async fn list(&self, label_selector: Option<&str>) -> std::result::Result<Vec<K>, kube::Error>;
}

// =============================================================================
// Command Port
// =============================================================================

/// Captured result of an external process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Process exited with status zero
    pub success: bool,
    /// Exit code, if the process was not killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output carrying only stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output carrying only stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// stdout followed by stderr, the way a terminal would show them
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Port for running external CLI tools to completion
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, feeding `stdin` if given.
    ///
    /// A non-zero exit is not an error here; only failing to start the
    /// process is.
    async fn run(&self, program: &str, args: &[String], stdin: Option<&str>) -> Result<CommandOutput>;
}
