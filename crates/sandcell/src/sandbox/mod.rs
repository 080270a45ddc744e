//! nsjail wrapper
//!
//! This module drives the nsjail sandbox binary: command building, slot
//! lifecycle management, and jailed process execution.
//!
//! References for nsjail's CLI arguments:
//! - https://github.com/google/nsjail
//! - `nsjail --help`

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use crate::sandbox::command::NsjailCommand;
pub use crate::sandbox::process::{RawOutcome, WaitKind, run_jailed};
pub use crate::sandbox::slot::{Slot, SlotPool};
use crate::types::MountConfig;

pub(crate) mod command;
pub(crate) mod process;
pub(crate) mod slot;

/// Errors that occur while constructing or tearing down sandboxes
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to prepare scratch space for slot {id}: {source}")]
    ScratchSetup {
        id: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to prepare cgroup for slot {id}: {source}")]
    CgroupSetup {
        id: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to tear down slot {id}: {message}")]
    TeardownFailed { id: u32, message: String },

    #[error("failed to spawn nsjail: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("nsjail command invalid: {0}")]
    CommandInvalid(String),

    #[error("slot pool is closed")]
    PoolClosed,

    #[error("mount source path does not exist: {0}")]
    MountSourceNotFound(String),

    #[error("mount target must be absolute: {0}")]
    MountTargetInvalid(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Attempt to set up the cgroup v2 hierarchy for the slot pool.
///
/// In container environments nothing pre-creates the cgroup subtree the jail
/// needs, so this replicates that job: create the directory at `cg_root` and
/// enable the memory and pids controllers so per-slot child cgroups work.
///
/// Returns `Ok(true)` if cgroups are ready, `Ok(false)` if setup is not
/// possible and the caller should fall back to rlimit-based memory limiting.
pub fn prepare_cgroup(cg_root: &Path) -> Result<bool, SandboxError> {
    let cg_base = Path::new("/sys/fs/cgroup");

    // Check if cgroup v2 is available
    let controllers_path = cg_base.join("cgroup.controllers");
    if !controllers_path.exists() {
        return Ok(false);
    }

    // Check if the memory controller is available in this namespace
    let controllers = fs::read_to_string(&controllers_path)?;
    if !controllers.split_whitespace().any(|c| c == "memory") {
        return Ok(false);
    }

    // If cg_root already has the memory controller enabled, nothing to do
    if cg_root.exists() {
        let subtree = cg_root.join("cgroup.subtree_control");
        if let Ok(content) = fs::read_to_string(&subtree)
            && content.split_whitespace().any(|c| c == "memory")
        {
            return Ok(true);
        }
    }

    // Move our process out of the root cgroup into a leaf cgroup.
    // cgroup v2's "no internal process" rule prevents enabling controllers
    // in a cgroup that has processes directly in it.
    let init_cg = cg_base.join("init");
    if !init_cg.exists() {
        fs::create_dir(&init_cg)?;
    }
    fs::write(init_cg.join("cgroup.procs"), std::process::id().to_string())?;

    // Enable memory and pids controllers at the root
    fs::write(cg_base.join("cgroup.subtree_control"), "+memory +pids")?;

    // Create the pool's cgroup directory
    if !cg_root.exists() {
        fs::create_dir(cg_root)?;
    }

    // Enable controllers for per-slot children
    fs::write(cg_root.join("cgroup.subtree_control"), "+memory +pids")?;

    Ok(true)
}

/// Validate a set of bind mounts before any execution uses them.
///
/// Non-optional mounts must have an existing source on the host; every mount
/// must have an absolute target inside the jail. Optional mounts with a
/// missing source are silently skipped at command-build time.
pub fn validate_mounts(mounts: &[MountConfig]) -> Result<(), SandboxError> {
    for mount in mounts {
        if !mount.target.starts_with('/') {
            return Err(SandboxError::MountTargetInvalid(mount.target.clone()));
        }
        if mount.optional {
            continue;
        }
        let path = Path::new(&mount.source);
        if !path.exists() {
            return Err(SandboxError::MountSourceNotFound(mount.source.clone()));
        }
    }
    Ok(())
}

/// Resolve a program name to an absolute path using the host's PATH.
///
/// The jailed process is started with `execve` inside a mount namespace
/// where PATH lookup against the host is meaningless, so bare command names
/// (like `python3`) are resolved to their canonical host path up front.
/// Commands that already contain a `/` are left unchanged.
pub fn resolve_command(command: &mut [String]) -> Result<(), SandboxError> {
    let first = match command.first_mut() {
        Some(first) => first,
        None => return Ok(()),
    };

    // Already an absolute or relative path
    if first.contains('/') {
        return Ok(());
    }

    let path_var = std::env::var("PATH").unwrap_or_default();
    for dir in path_var.split(':') {
        let candidate = PathBuf::from(dir).join(&*first);
        if candidate.exists() {
            // Canonicalize so the path is reachable inside the jail without
            // relying on symlink resolution across bind-mount boundaries.
            *first = fs::canonicalize(&candidate)
                .unwrap_or(candidate)
                .to_string_lossy()
                .into_owned();
            return Ok(());
        }
    }

    Err(SandboxError::CommandInvalid(format!(
        "command '{first}' not found in PATH",
    )))
}
