//! Ready-made workflows.
//!
//! Each builder takes a [`Config`](crate::config::Config) and returns a
//! validated [`TaskGraph`](crate::core::TaskGraph).

pub mod vision;

pub use vision::{vision_workflow, PRODUCTS, PRODUCT_SETS};
