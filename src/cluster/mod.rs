//! Cluster adapters
//!
//! Real implementations of the domain ports: `kube::Api` for the cluster
//! API and `ProcessRunner` for external tools.

pub mod command;
pub mod kube_api;

#[cfg(test)]
pub mod fake;

pub use command::*;
