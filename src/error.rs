//! Error types for the CSI end-to-end suite
//!
//! Every orchestrator failure ends up here. Deadline and cancellation are
//! kept apart from fatal errors so a caller can tell "the condition never
//! held" from "the cluster rejected the request".

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the suite
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    // =========================================================================
    // Orchestration Errors
    // =========================================================================
    #[error("{operation} failed for {resource}: {source}")]
    Operation {
        operation: String,
        resource: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Timed out after {timeout:?} waiting for {operation} of {resource}")]
    DeadlineExceeded {
        operation: String,
        resource: String,
        timeout: Duration,
    },

    #[error("Cancelled while waiting for {operation} of {resource}")]
    Cancelled { operation: String, resource: String },

    // =========================================================================
    // External Command Errors
    // =========================================================================
    #[error("Failed to run {program}: {reason}")]
    CommandSpawn { program: String, reason: String },

    #[error("Command `{command}` failed: {output}")]
    CommandFailed { command: String, output: String },

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Backend {what} count mismatch: found {actual}, expected {expected} ({listing})")]
    BackendCount {
        what: String,
        expected: usize,
        actual: usize,
        listing: String,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("Manifest error in {path}: {reason}")]
    Manifest { path: String, reason: String },

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wrap an error with the operation and resource it interrupted
    pub fn in_operation(self, operation: &str, resource: impl ToString) -> Self {
        Error::Operation {
            operation: operation.to_string(),
            resource: resource.to_string(),
            source: Box::new(self),
        }
    }

    /// The innermost error, with operation context peeled off
    pub fn root(&self) -> &Error {
        match self {
            Error::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    /// The condition never became true within the allotted time
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self.root(), Error::DeadlineExceeded { .. })
    }

    /// The wait was interrupted from outside
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Error::Cancelled { .. })
    }

    /// Anything that is neither a deadline nor a cancellation
    pub fn is_fatal(&self) -> bool {
        !self.is_deadline_exceeded() && !self.is_cancelled()
    }
}

/// Result type alias for the suite
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_context_in_message() {
        let err = Error::Validation("size 100 below 900".into())
            .in_operation("validate volume size", "Pod rbd-1/csi-rbd-demo-pod");

        let message = err.to_string();
        assert!(message.contains("validate volume size"));
        assert!(message.contains("Pod rbd-1/csi-rbd-demo-pod"));
        assert!(message.contains("size 100 below 900"));
    }

    #[test]
    fn test_kinds_are_distinct() {
        let deadline = Error::DeadlineExceeded {
            operation: "bind".into(),
            resource: "PersistentVolumeClaim ns/claim".into(),
            timeout: Duration::from_secs(120),
        }
        .in_operation("create pvc", "PersistentVolumeClaim ns/claim");
        assert!(deadline.is_deadline_exceeded());
        assert!(!deadline.is_cancelled());
        assert!(!deadline.is_fatal());

        let cancelled = Error::Cancelled {
            operation: "bind".into(),
            resource: "PersistentVolumeClaim ns/claim".into(),
        };
        assert!(cancelled.is_cancelled());
        assert!(!cancelled.is_fatal());

        let fatal = Error::Configuration("missing pool".into());
        assert!(fatal.is_fatal());
    }
}
