//! Dependency-ordered operation graphs.
//!
//! Tasks perform Create/Get/Update/Delete calls on remote resources through an
//! [`OperationClient`](client::OperationClient). Edges say which task must
//! succeed before another starts, and later tasks can read an earlier task's
//! output from the run's [`ResultStore`](core::ResultStore).

pub mod client;
pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod workflow;

pub use error::{Error, Result};
