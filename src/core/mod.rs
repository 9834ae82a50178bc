//! Core domain models for operation graphs.
//!
//! This module contains the fundamental data structures: task nodes, the
//! dependency graph, and the run-scoped result store.

pub mod dag;
pub mod store;
pub mod task;

pub use dag::{GraphBuilder, TaskGraph};
pub use store::{ResultRecord, ResultStore};
pub use task::{OperationKind, Payload, ResourceId, TaskNode, TaskOutcome};
