//! Orchestration layer.
//!
//! This module drives a validated task graph to completion against an
//! [`OperationClient`](crate::client::OperationClient).

mod scheduler;

pub use scheduler::{RunId, RunReport, Scheduler, SchedulerEvent};
