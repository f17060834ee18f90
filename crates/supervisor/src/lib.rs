//! Supervisor for remote GPU training pods.
//!
//! Provisions a RunPod pod, waits until it is reachable, submits training
//! files to it one after another, watches the training status and finally
//! applies a teardown policy.

pub mod cmd;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
