//! Domain layer - port definitions
//!
//! Orchestrators depend on these traits only; the Kubernetes client and
//! process spawning live behind them in `cluster`.

pub mod ports;

pub use ports::*;
