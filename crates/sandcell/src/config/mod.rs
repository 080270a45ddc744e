use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

use crate::types::{MountConfig, ResourceLimits};

mod loader;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../sandcell.example.toml");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Config for Sandcell
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Path to the nsjail binary (uses PATH if not specified).
    #[serde(default)]
    pub nsjail_path: Option<PathBuf>,

    /// Number of sandbox slots that may run concurrently.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// How many submissions may wait for a free slot before new submissions
    /// are rejected outright.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: u32,

    /// Use cgroup v2 memory accounting instead of RLIMIT_AS.
    ///
    /// When enabled, each slot gets its own cgroup leaf under `cg_root` and
    /// memory-limit kills are detected from the cgroup's oom_kill counter.
    /// This limits actual memory usage (RSS) rather than virtual address
    /// space, which matters for runtimes that map large address ranges.
    #[serde(default)]
    pub cgroup: bool,

    /// Cgroup root for the slot pool. Sandcell will attempt to create this
    /// directory and enable the memory and pids controllers at startup,
    /// which replaces the need for systemd delegation in container
    /// environments.
    #[serde(default = "default_cg_root")]
    pub cg_root: PathBuf,

    /// Directory holding per-slot scratch space. Defaults to the system
    /// temp dir.
    #[serde(default)]
    pub scratch_root: Option<PathBuf>,

    /// Interpreter invocation; the submitted code is fed to its stdin.
    #[serde(default = "default_interpreter")]
    pub interpreter: Vec<String>,

    /// Environment variables set inside the jail.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// UID the jailed process runs under.
    #[serde(default = "default_nobody")]
    pub uid: u32,

    /// GID the jailed process runs under.
    #[serde(default = "default_nobody")]
    pub gid: u32,

    /// Maximum number of output files returned per execution.
    #[serde(default = "default_max_attachments")]
    pub max_attachments: usize,

    /// Maximum size in bytes of a single returned output file.
    #[serde(default = "default_max_attachment_size")]
    pub max_attachment_size: u64,

    /// Optional read-only mount shared by every execution, typically a
    /// pre-built dependency tree.
    #[serde(default)]
    pub package_cache: Option<MountConfig>,

    /// Global directory mounts applied to all sandbox invocations.
    #[serde(default)]
    pub sandbox_mounts: Vec<MountConfig>,

    /// Default resource limits applied to all executions.
    /// These are overridden field by field when the execution request
    /// specifies its own limits.
    #[serde(default)]
    pub default_limits: ResourceLimits,
}

impl Config {
    /// Create a new config from the embedded example configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the path to the nsjail binary
    pub fn nsjail_binary(&self) -> PathBuf {
        self.nsjail_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("nsjail"))
    }

    /// Merge resource limits with defaults
    pub fn effective_limits(&self, overrides: &ResourceLimits) -> ResourceLimits {
        self.default_limits.with_overrides(overrides)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

fn default_pool_size() -> u32 {
    2
}

fn default_queue_depth() -> u32 {
    8
}

fn default_cg_root() -> PathBuf {
    PathBuf::from("/sys/fs/cgroup/sandcell")
}

fn default_interpreter() -> Vec<String> {
    vec!["/usr/bin/python3".to_string(), "-u".to_string(), "-".to_string()]
}

fn default_nobody() -> u32 {
    65534
}

fn default_max_attachments() -> usize {
    2
}

fn default_max_attachment_size() -> u64 {
    32 * 1024 * 1024
}
