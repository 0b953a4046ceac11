//! Storage backend inspection
//!
//! Tests cross-check what the cluster API reports against the Ceph cluster
//! itself.

pub mod ceph;

pub use ceph::*;
