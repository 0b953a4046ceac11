//! Polling core
//!
//! - `poller`: the fixed-interval condition loop
//! - `classify`: API error classification
//! - `cli`: text classification of kubectl output
//! - `waiter`: poller plus budget, cancellation and error context

pub mod classify;
pub mod cli;
pub mod poller;
pub mod waiter;

pub use classify::*;
pub use cli::*;
pub use poller::*;
pub use waiter::*;
