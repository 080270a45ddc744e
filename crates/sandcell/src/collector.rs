//! Result collection
//!
//! Turns the runner's raw observations into an `ExecutionResult`. This is a
//! pure mapping: identical inputs give identical results, and all recovery
//! (killing, reaping, teardown) has already happened upstream.

use crate::sandbox::{RawOutcome, WaitKind};
use crate::types::{ExecutionResult, ExitStatus};

/// SIGKILL, the signal both the OOM killer and the jail's own limit
/// enforcement deliver.
const SIGKILL: i32 = 9;

/// Exit code nsjail reports when the jailed process died to a signal
/// while running under `--really_quiet`.
const SIGNALLED_EXIT_BASE: i32 = 128;

/// Map a raw outcome to the caller-facing result.
///
/// `memory_limit` is the effective limit the request ran under; it drives
/// the fallback memory-exceeded heuristic when no cgroup counter is
/// available.
pub(crate) fn collect(raw: RawOutcome, memory_limit: Option<u64>) -> ExecutionResult {
    let status = classify(&raw, memory_limit);

    ExecutionResult {
        status,
        stdout: raw.stdout,
        stderr: raw.stderr,
        stdout_truncated: raw.stdout_truncated,
        stderr_truncated: raw.stderr_truncated,
        wall_time: raw.wall_time,
        peak_memory: raw.peak_memory,
        attachments: Vec::new(),
        message: None,
    }
}

fn classify(raw: &RawOutcome, memory_limit: Option<u64>) -> ExitStatus {
    // The cgroup counter is authoritative: an OOM kill is a memory-limit
    // outcome no matter how the jail's exit surfaced.
    if raw.oom_kills > 0 {
        return ExitStatus::MemoryExceeded;
    }

    match raw.wait {
        WaitKind::TimedOut => ExitStatus::TimedOut,
        WaitKind::OutputExceeded => ExitStatus::Killed,
        WaitKind::Signaled(sig) => {
            if sig == SIGKILL && peak_reached_limit(raw.peak_memory, memory_limit) {
                ExitStatus::MemoryExceeded
            } else {
                ExitStatus::Killed
            }
        }
        // nsjail folds a fatal signal of the jailed process into
        // 128 + signo; a folded kill is never a caller-visible success
        WaitKind::Exited(code) if code > SIGNALLED_EXIT_BASE => {
            let sig = code - SIGNALLED_EXIT_BASE;
            if sig == SIGKILL && peak_reached_limit(raw.peak_memory, memory_limit) {
                ExitStatus::MemoryExceeded
            } else {
                ExitStatus::Killed
            }
        }
        WaitKind::Exited(code) => ExitStatus::Success(code),
    }
}

/// Fallback heuristic for hosts without the oom_kill counter: a SIGKILL
/// with peak usage at (or within one page of) the limit is treated as a
/// memory-limit kill.
fn peak_reached_limit(peak: Option<u64>, limit: Option<u64>) -> bool {
    match (peak, limit) {
        (Some(peak), Some(limit)) => peak.saturating_add(4096) >= limit,
        _ => false,
    }
}
