//! Command builder for the nsjail CLI
//!
//! Renders resource limits, mounts, and environment into nsjail
//! command-line arguments. The limits are part of the argument vector, so
//! they are in force before the jailed process executes its first
//! instruction.

use std::path::{Path, PathBuf};

use crate::types::{MountConfig, ResourceLimits};

/// Slack added to nsjail's wall clock kill. The host-side watchdog fires
/// at the request's wall limit and owns timeout classification; the
/// jail-side limit is only a backstop, so it must sit strictly above.
const TIME_LIMIT_SLACK_SECS: u64 = 1;

/// Builder for nsjail command-line arguments
#[derive(Debug)]
pub struct NsjailCommand {
    /// Path to the nsjail binary
    nsjail_path: PathBuf,
    /// Resource limits
    limits: ResourceLimits,
    /// Bind mounts, applied in order
    mounts: Vec<MountConfig>,
    /// --env K=V pairs, in insertion order
    env: Vec<(String, String)>,
    /// --cwd
    working_dir: Option<String>,
    /// --user / --group
    uid: Option<u32>,
    gid: Option<u32>,
    /// Per-slot cgroup v2 directory; enables cgroup-based limits
    cgroup_dir: Option<PathBuf>,
    /// --log file for nsjail's own messages, keeping the jailed
    /// process's stderr clean
    log_file: Option<PathBuf>,
    /// Command to run inside the jail
    command: Vec<String>,
}

impl NsjailCommand {
    /// Create a new nsjail command builder
    pub fn new(nsjail_path: impl Into<PathBuf>) -> Self {
        Self {
            nsjail_path: nsjail_path.into(),
            limits: ResourceLimits::default(),
            mounts: Vec::new(),
            env: Vec::new(),
            working_dir: None,
            uid: None,
            gid: None,
            cgroup_dir: None,
            log_file: None,
            command: Vec::new(),
        }
    }

    /// Set resource limits
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Add a bind mount
    pub fn mount(mut self, mount: MountConfig) -> Self {
        self.mounts.push(mount);
        self
    }

    /// Add multiple bind mounts
    pub fn mounts(mut self, mounts: impl IntoIterator<Item = MountConfig>) -> Self {
        self.mounts.extend(mounts);
        self
    }

    /// Set an environment variable inside the jail
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the working directory inside the jail
    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Run the jailed process as this uid/gid
    pub fn user(mut self, uid: u32, gid: u32) -> Self {
        self.uid = Some(uid);
        self.gid = Some(gid);
        self
    }

    /// Use cgroup v2 limits rooted at the given per-slot directory
    pub fn cgroup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cgroup_dir = Some(dir.into());
        self
    }

    /// Redirect nsjail's own log output to a file
    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Set the command to run inside the jail
    pub fn command(mut self, cmd: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.command = cmd.into_iter().map(Into::into).collect();
        self
    }

    /// Build the command-line arguments.
    ///
    /// The first element is the nsjail binary path. Consumes self to avoid
    /// cloning the command vector.
    pub fn build(self) -> Vec<String> {
        let mut args = vec![self.nsjail_path.to_string_lossy().into_owned()];

        // Run once and exit with the jailed process
        args.push("--mode".to_string());
        args.push("o".to_string());

        if let Some(ref log) = self.log_file {
            args.push(format!("--log={}", log.display()));
        } else {
            args.push("--really_quiet".to_string());
        }

        if let Some(uid) = self.uid {
            args.push(format!("--user={uid}"));
        }
        if let Some(gid) = self.gid {
            args.push(format!("--group={gid}"));
        }

        // Wall clock backstop; the watchdog is expected to fire first
        if let Some(wall) = self.limits.wall_time {
            args.push(format!(
                "--time_limit={}",
                wall.ceil() as u64 + TIME_LIMIT_SLACK_SECS
            ));
        }
        if let Some(cpu) = self.limits.cpu_time {
            args.push(format!("--rlimit_cpu={}", cpu.ceil() as u64));
        }

        if let Some(memory) = self.limits.memory {
            if let Some(ref cg) = self.cgroup_dir {
                args.push("--use_cgroupv2".to_string());
                args.push(format!("--cgroupv2_mount={}", cg.display()));
                args.push(format!("--cgroup_mem_max={memory}"));
                if let Some(pids) = self.limits.max_processes {
                    args.push(format!("--cgroup_pids_max={pids}"));
                }
            } else {
                // rlimit_as takes megabytes
                args.push(format!("--rlimit_as={}", memory.div_ceil(1024 * 1024)));
            }
        }
        if self.cgroup_dir.is_none()
            && let Some(pids) = self.limits.max_processes
        {
            args.push(format!("--rlimit_nproc={pids}"));
        }

        // Cap file sizes in scratch at the output cap; rlimit_fsize takes megabytes
        if let Some(output) = self.limits.max_output {
            args.push(format!("--rlimit_fsize={}", output.div_ceil(1024 * 1024)));
        }
        if let Some(open_files) = self.limits.max_open_files {
            args.push(format!("--rlimit_nofile={open_files}"));
        }

        // Network is denied by a fresh net namespace unless explicitly granted
        if self.limits.allow_network == Some(true) {
            args.push("--disable_clone_newnet".to_string());
        }

        for mount in &self.mounts {
            // Skip optional mounts whose source doesn't exist
            if mount.optional && !Path::new(&mount.source).exists() {
                continue;
            }
            let flag = if mount.writable {
                "--bindmount"
            } else {
                "--bindmount_ro"
            };
            args.push(format!("{flag}={}:{}", mount.source, mount.target));
        }

        if let Some(ref dir) = self.working_dir {
            args.push(format!("--cwd={dir}"));
        }

        for (key, value) in &self.env {
            args.push(format!("--env={key}={value}"));
        }

        // Separator and command
        args.push("--".to_string());
        args.extend(self.command);

        args
    }

    /// Get the nsjail binary path
    pub fn nsjail_path(&self) -> &Path {
        &self.nsjail_path
    }
}
