use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Resource ceilings applied to one sandboxed execution.
///
/// All fields are optional so partial limit sets can be merged with
/// [`with_overrides`](Self::with_overrides); the effective limits handed to
/// the jail always come from merging the configured defaults with the
/// per-request overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU time limit in seconds
    #[serde(default)]
    pub cpu_time: Option<f64>,

    /// Wall clock time limit in seconds
    #[serde(default)]
    pub wall_time: Option<f64>,

    /// Memory limit in bytes
    #[serde(default)]
    pub memory: Option<u64>,

    /// Maximum number of processes/threads inside the jail
    #[serde(default)]
    pub max_processes: Option<u32>,

    /// Maximum captured output per stream, in bytes
    #[serde(default)]
    pub max_output: Option<u64>,

    /// Maximum open files
    #[serde(default)]
    pub max_open_files: Option<u32>,

    /// Whether the jailed process gets network access (default: denied)
    #[serde(default)]
    pub allow_network: Option<bool>,
}

impl ResourceLimits {
    /// 1 kilobyte in bytes
    pub const KB: u64 = 1024;
    /// 1 megabyte in bytes
    pub const MB: u64 = 1024 * 1024;
    /// 1 gigabyte in bytes
    pub const GB: u64 = 1024 * 1024 * 1024;

    /// Create new resource limits with all fields unset
    pub fn none() -> Self {
        Self {
            cpu_time: None,
            wall_time: None,
            memory: None,
            max_processes: None,
            max_output: None,
            max_open_files: None,
            allow_network: None,
        }
    }

    /// Set the CPU time limit in seconds
    pub fn with_cpu_time(mut self, seconds: f64) -> Self {
        self.cpu_time = Some(seconds);
        self
    }

    /// Set the wall clock time limit in seconds
    pub fn with_wall_time(mut self, seconds: f64) -> Self {
        self.wall_time = Some(seconds);
        self
    }

    /// Set the memory limit in bytes
    pub fn with_memory(mut self, bytes: u64) -> Self {
        self.memory = Some(bytes);
        self
    }

    /// Set the maximum number of processes
    pub fn with_max_processes(mut self, count: u32) -> Self {
        self.max_processes = Some(count);
        self
    }

    /// Set the maximum captured output per stream in bytes
    pub fn with_max_output(mut self, bytes: u64) -> Self {
        self.max_output = Some(bytes);
        self
    }

    /// Set the maximum number of open files
    pub fn with_max_open_files(mut self, count: u32) -> Self {
        self.max_open_files = Some(count);
        self
    }

    /// Allow or deny network access
    pub fn with_network(mut self, allow: bool) -> Self {
        self.allow_network = Some(allow);
        self
    }

    /// Apply overrides from another ResourceLimits, preferring values from `overrides`
    ///
    /// Returns a new ResourceLimits with values from `overrides` taking precedence
    /// over values from `self` when both are present.
    pub fn with_overrides(&self, overrides: &ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            cpu_time: overrides.cpu_time.or(self.cpu_time),
            wall_time: overrides.wall_time.or(self.wall_time),
            memory: overrides.memory.or(self.memory),
            max_processes: overrides.max_processes.or(self.max_processes),
            max_output: overrides.max_output.or(self.max_output),
            max_open_files: overrides.max_open_files.or(self.max_open_files),
            allow_network: overrides.allow_network.or(self.allow_network),
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_time: Some(2.0),
            wall_time: Some(6.0),
            memory: Some(256 * Self::MB),
            max_processes: Some(6),
            max_output: Some(Self::MB),
            max_open_files: Some(64),
            allow_network: Some(false),
        }
    }
}

/// One code snippet to execute, with its arguments and limit overrides.
///
/// Immutable once submitted to the coordinator.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// The code payload, streamed to the interpreter's stdin
    pub code: String,

    /// Extra arguments appended to the interpreter command
    pub args: Vec<String>,

    /// Per-request limit overrides, merged over the configured defaults
    pub limits: ResourceLimits,
}

impl ExecutionRequest {
    /// Create a request for the given code payload with no overrides
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            args: Vec::new(),
            limits: ResourceLimits::none(),
        }
    }

    /// Append arguments for the interpreter invocation
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Override the wall clock timeout for this request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.limits.wall_time = Some(timeout.as_secs_f64());
        self
    }

    /// Override the memory limit (bytes) for this request
    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.limits.memory = Some(bytes);
        self
    }

    /// Override the per-stream output cap (bytes) for this request
    pub fn with_output_limit(mut self, bytes: u64) -> Self {
        self.limits.max_output = Some(bytes);
        self
    }

    /// Override the full limit set for this request
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// Terminal status of a sandboxed execution.
///
/// This is a closed set: every request resolves to exactly one of these,
/// and running untrusted code into a limit is a normal outcome here, not a
/// system error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitStatus {
    /// The interpreter exited on its own; carries its exit code
    #[serde(rename = "success")]
    Success(i32),

    /// The wall clock timeout fired and the process subtree was killed
    #[serde(rename = "timed_out")]
    TimedOut,

    /// The process was killed for exceeding its memory limit
    #[serde(rename = "memory_exceeded")]
    MemoryExceeded,

    /// The process was killed by a signal or for exceeding the output cap
    #[serde(rename = "killed")]
    Killed,

    /// The sandbox could not be constructed; the code never ran
    #[serde(rename = "setup_failed")]
    SetupFailed,
}

impl ExitStatus {
    /// Check whether the execution completed with exit code 0
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, ExitStatus::Success(0))
    }

    /// Check whether the process was terminated by the sandbox
    /// (timeout, memory, or kill) rather than exiting on its own
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        matches!(
            self,
            ExitStatus::TimedOut | ExitStatus::MemoryExceeded | ExitStatus::Killed
        )
    }
}

/// A file written by the jailed code and collected from the slot's
/// scratch space after the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttachment {
    /// File name relative to the sandbox home directory
    pub path: String,

    /// Raw file content
    pub content: Vec<u8>,
}

impl FileAttachment {
    /// Size of the attachment in bytes
    pub fn size(&self) -> usize {
        self.content.len()
    }
}

/// Result of one sandboxed execution. Produced exactly once per request.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Terminal status of the execution
    pub status: ExitStatus,

    /// Captured standard output, at most the configured output cap
    pub stdout: Vec<u8>,

    /// Captured standard error, at most the configured output cap
    pub stderr: Vec<u8>,

    /// Whether stdout hit the output cap and was cut off
    pub stdout_truncated: bool,

    /// Whether stderr hit the output cap and was cut off
    pub stderr_truncated: bool,

    /// Wall clock time from spawn to reap
    pub wall_time: Duration,

    /// Peak memory usage in bytes, when the slot cgroup reported one
    pub peak_memory: Option<u64>,

    /// Output files collected from the sandbox home after the run
    pub attachments: Vec<FileAttachment>,

    /// Human-readable detail, set for setup failures
    pub message: Option<String>,
}

impl ExecutionResult {
    /// Check if the execution completed with exit code 0
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Check if either output stream was truncated
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.stdout_truncated || self.stderr_truncated
    }

    /// Build a result for a request whose sandbox could not be constructed.
    ///
    /// The untrusted code never ran, so streams are empty and wall time is zero.
    pub fn setup_failed(message: impl Into<String>) -> Self {
        Self {
            status: ExitStatus::SetupFailed,
            message: Some(message.into()),
            ..Default::default()
        }
    }
}

impl Default for ExecutionResult {
    fn default() -> Self {
        Self {
            status: ExitStatus::Success(0),
            stdout: Vec::new(),
            stderr: Vec::new(),
            stdout_truncated: false,
            stderr_truncated: false,
            wall_time: Duration::ZERO,
            peak_memory: None,
            attachments: Vec::new(),
            message: None,
        }
    }
}

/// Configuration for a directory bind-mounted into the jail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    /// Source path on the host
    pub source: String,

    /// Target path inside the jail
    pub target: String,

    /// Whether the mount is read-write (default: read-only)
    #[serde(default)]
    pub writable: bool,

    /// Whether this mount is optional (skipped if the source doesn't exist)
    #[serde(default)]
    pub optional: bool,
}
