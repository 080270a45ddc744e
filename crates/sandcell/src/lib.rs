//! A library for sandboxed execution of untrusted code snippets.
//!
//! Sandcell provides an async Rust API for running untrusted code inside
//! nsjail with strict resource limits, returning captured output and a
//! classified exit status.
//!
//! # Features
//!
//! - **Sandboxed execution**: slot-based lifecycle for running untrusted code under nsjail.
//! - **Resource limits**: CPU time, wall time, memory, processes, output size, and open files.
//! - **Bounded concurrency**: a fixed slot pool with an admission queue and fast-fail rejection.
//! - **Output files**: files the code writes to its home directory come back with the result.
//! - **TOML configuration**: interpreter, mounts, credentials, and default limits.
//! - **cgroup v2 support**: RSS-based memory limiting and OOM-kill detection in container environments.

pub use config::{Config, ConfigError, EXAMPLE_CONFIG};
pub use coordinator::{Coordinator, SubmitError};
pub use sandbox::{SandboxError, Slot, SlotPool, prepare_cgroup};
pub use types::{
    ExecutionRequest, ExecutionResult, ExitStatus, FileAttachment, MountConfig, ResourceLimits,
};

mod collector;
pub mod config;
pub mod coordinator;
pub mod sandbox;
pub mod types;
