//! Jailed process execution
//!
//! Spawns nsjail, streams the code payload to the interpreter's stdin, and
//! drains stdout/stderr concurrently up to the output cap while a
//! wall-clock watchdog runs. Exactly one terminal outcome is produced per
//! spawn; the process is never restarted or retried.

use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::Notify;
use tracing::{debug, instrument, warn};

use crate::sandbox::slot::Slot;
use crate::sandbox::SandboxError;

/// How a jailed execution reached its terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitKind {
    /// The jail exited on its own with this code
    Exited(i32),

    /// The jail was killed by this signal
    Signaled(i32),

    /// The watchdog deadline fired and the jail was killed
    TimedOut,

    /// An output stream hit its cap and the jail was killed
    OutputExceeded,
}

/// Everything the runner observed about one execution, before any
/// interpretation. The collector turns this into an `ExecutionResult`.
#[derive(Debug, Clone)]
pub struct RawOutcome {
    pub wait: WaitKind,
    pub stdout: Vec<u8>,
    pub stdout_truncated: bool,
    pub stderr: Vec<u8>,
    pub stderr_truncated: bool,
    pub wall_time: Duration,
    /// oom_kill count from the slot cgroup's memory.events, 0 without cgroups
    pub oom_kills: u64,
    /// memory.peak of the slot cgroup in bytes, when available
    pub peak_memory: Option<u64>,
}

/// Run an nsjail invocation inside a prepared slot.
///
/// `payload` is written to the jailed process's stdin, which is then
/// closed. `output_limit` caps each captured stream; `deadline` is the
/// watchdog timeout (the request's wall clock limit), after which the
/// whole jail is killed and the run is classified as timed out. Killing
/// nsjail kills its pid namespace, so no orphans of the untrusted code
/// survive past this function.
#[instrument(skip(slot, args, payload), fields(slot_id = slot.id()))]
pub async fn run_jailed(
    slot: &Slot,
    args: Vec<String>,
    payload: Vec<u8>,
    output_limit: u64,
    deadline: Duration,
) -> Result<RawOutcome, SandboxError> {
    let program = args
        .first()
        .ok_or_else(|| SandboxError::CommandInvalid("empty command arguments".to_string()))?;

    debug!(?args, "spawning jail");

    let mut child = Command::new(program)
        .args(&args[1..])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(SandboxError::SpawnFailed)?;

    let started = Instant::now();

    // Feed the payload concurrently with draining, so a child that stops
    // reading cannot deadlock us against a full pipe.
    if let Some(mut stdin) = child.stdin.take() {
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&payload).await {
                debug!(error = %e, "payload write ended early");
            }
            let _ = stdin.shutdown().await;
        });
    }

    let overflow = Arc::new(Notify::new());
    let cap = usize::try_from(output_limit).unwrap_or(usize::MAX);

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| SandboxError::CommandInvalid("child stdout not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| SandboxError::CommandInvalid("child stderr not captured".to_string()))?;

    let stdout_task = tokio::spawn(drain_capped(stdout, cap, overflow.clone()));
    let stderr_task = tokio::spawn(drain_capped(stderr, cap, overflow.clone()));

    // Exactly one terminal transition: natural exit, overflow, or the
    // watchdog deadline.
    let waited = tokio::time::timeout(deadline, async {
        tokio::select! {
            status = child.wait() => status.map(Some),
            _ = overflow.notified() => Ok(None),
        }
    })
    .await;

    let wait = match waited {
        Ok(Ok(Some(status))) => match status.code() {
            Some(code) => WaitKind::Exited(code),
            None => WaitKind::Signaled(status.signal().unwrap_or(0)),
        },
        Ok(Ok(None)) => {
            debug!("output cap hit; killing jail");
            kill_and_reap(&mut child).await;
            WaitKind::OutputExceeded
        }
        Ok(Err(e)) => return Err(SandboxError::Io(e)),
        Err(_) => {
            warn!(?deadline, "watchdog fired; killing jail");
            kill_and_reap(&mut child).await;
            WaitKind::TimedOut
        }
    };

    let wall_time = started.elapsed();

    // The pipes are closed now that the child is gone, so the drains finish.
    let (stdout, stdout_truncated) = stdout_task
        .await
        .map_err(|e| SandboxError::Io(std::io::Error::other(e)))?;
    let (stderr, stderr_truncated) = stderr_task
        .await
        .map_err(|e| SandboxError::Io(std::io::Error::other(e)))?;

    let (oom_kills, peak_memory) = read_cgroup_stats(slot).await;

    debug!(
        ?wait,
        wall_time_ms = wall_time.as_millis(),
        stdout_len = stdout.len(),
        stderr_len = stderr.len(),
        oom_kills,
        "jail finished"
    );

    Ok(RawOutcome {
        wait,
        stdout,
        stdout_truncated,
        stderr,
        stderr_truncated,
        wall_time,
        oom_kills,
        peak_memory,
    })
}

/// Kill the jail and wait for it to be reaped. nsjail is pid 1 of the
/// jail's pid namespace, so this takes the whole subtree down with it.
async fn kill_and_reap(child: &mut tokio::process::Child) {
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "kill failed (process already gone?)");
    }
    if let Err(e) = child.wait().await {
        warn!(error = %e, "failed to reap killed jail");
    }
}

/// Read a stream to completion or until `cap` bytes have been kept.
///
/// Returns the captured bytes (never more than `cap`) and whether the
/// stream produced more than `cap` bytes. On overflow the notify is
/// signalled so the runner can terminate the producer.
async fn drain_capped<R: AsyncRead + Unpin>(
    mut reader: R,
    cap: usize,
    overflow: Arc<Notify>,
) -> (Vec<u8>, bool) {
    let mut data = Vec::new();
    let mut buf = [0u8; 8192];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => return (data, false),
            Ok(n) => {
                let remaining = cap - data.len();
                if n > remaining {
                    data.extend_from_slice(&buf[..remaining]);
                    overflow.notify_one();
                    return (data, true);
                }
                data.extend_from_slice(&buf[..n]);
            }
            // Pipe errors mean the producer is gone; keep what we have
            Err(_) => return (data, false),
        }
    }
}

/// Read oom_kill and peak memory from the slot's cgroup leaf.
///
/// Both reads are best-effort: without cgroup mode, or on kernels missing
/// memory.peak, the counters default to zero/None.
async fn read_cgroup_stats(slot: &Slot) -> (u64, Option<u64>) {
    let Some(cg) = slot.cgroup_path() else {
        return (0, None);
    };

    let oom_kills = match tokio::fs::read_to_string(cg.join("memory.events")).await {
        Ok(content) => parse_oom_kills(&content),
        Err(_) => 0,
    };
    let peak_memory = match tokio::fs::read_to_string(cg.join("memory.peak")).await {
        Ok(content) => parse_peak_memory(&content),
        Err(_) => None,
    };

    (oom_kills, peak_memory)
}

/// Parse the `oom_kill` counter out of a cgroup v2 memory.events file.
/// memory.events covers the whole subtree, so kills inside the jail's own
/// child cgroup are counted too.
fn parse_oom_kills(content: &str) -> u64 {
    for line in content.lines() {
        if let Some((key, value)) = line.trim().split_once(' ')
            && key == "oom_kill"
        {
            return value.trim().parse().unwrap_or(0);
        }
    }
    0
}

/// Parse a cgroup v2 memory.peak file (a single byte count).
fn parse_peak_memory(content: &str) -> Option<u64> {
    content.trim().parse().ok()
}
