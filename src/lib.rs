//! Devcontainer provisioning: resolve an image, start a container and run its
//! lifecycle hooks.

pub mod config;
pub mod container;
pub mod core;
pub mod docker;
pub mod monitoring;
pub mod runner;

pub use crate::core::{ExecResult, RunContext, RunnerError, RunnerResult, Settings};
pub use runner::Runner;
