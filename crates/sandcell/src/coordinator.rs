//! Execution coordination
//!
//! The coordinator is the single entry point for running untrusted code. It
//! owns the slot pool and an admission queue, merges request limits with
//! configured defaults, builds the jail invocation, and hands the raw
//! outcome to the collector. Every submission either produces exactly one
//! `ExecutionResult` or is rejected up front.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Semaphore, TryAcquireError};
use tracing::{debug, instrument, warn};

use crate::collector::collect;
use crate::config::Config;
use crate::sandbox::{
    NsjailCommand, SandboxError, Slot, SlotPool, resolve_command, run_jailed, validate_mounts,
};
use crate::types::{ExecutionRequest, ExecutionResult, ResourceLimits};

/// Watchdog deadline used if no wall time limit is configured anywhere.
const FALLBACK_DEADLINE_SECS: f64 = 30.0;

/// Rejection of a submission before any slot work happens
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    /// Every slot is busy and the wait queue is full
    #[error("all execution slots are busy and the queue is full")]
    Busy,

    /// The coordinator is shutting down
    #[error("coordinator is closed")]
    Closed,
}

/// Coordinates executions across a bounded pool of sandbox slots
///
/// Cheap to share behind an `Arc`; `submit` takes `&self` and any number of
/// submissions may be in flight at once, bounded by the pool and queue.
#[derive(Debug)]
pub struct Coordinator {
    config: Config,
    pool: SlotPool,

    /// Admission semaphore sized pool_size + queue_depth. Holding a permit
    /// means the submission is either running or within its queue budget;
    /// no permit available means Busy.
    queue: Arc<Semaphore>,
}

impl Coordinator {
    /// Create a coordinator from a validated configuration.
    ///
    /// Mounts are checked once here rather than per submission, so a bad
    /// mount fails startup instead of failing every request.
    pub fn new(config: Config) -> Result<Self, SandboxError> {
        validate_mounts(&config.sandbox_mounts)?;
        if let Some(ref cache) = config.package_cache {
            validate_mounts(std::slice::from_ref(cache))?;
        }

        let scratch_root = config
            .scratch_root
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let cg_root = config.cgroup.then(|| config.cg_root.clone());
        let pool = SlotPool::new(config.pool_size, scratch_root, cg_root);

        let admission = (config.pool_size + config.queue_depth) as usize;

        Ok(Self {
            config,
            pool,
            queue: Arc::new(Semaphore::new(admission)),
        })
    }

    /// Run one code submission to completion.
    ///
    /// Returns `Err` only for admission rejections. Failures to set up or
    /// drive the sandbox surface as an `ExecutionResult` with
    /// `ExitStatus::SetupFailed`, since from the caller's point of view the
    /// submission was accepted and produced an outcome.
    #[instrument(skip(self, request), fields(code_len = request.code.len()))]
    pub async fn submit(&self, request: ExecutionRequest) -> Result<ExecutionResult, SubmitError> {
        let _admission = match self.queue.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                debug!("queue full; rejecting submission");
                return Err(SubmitError::Busy);
            }
            Err(TryAcquireError::Closed) => return Err(SubmitError::Closed),
        };

        let slot = match self.pool.acquire().await {
            Ok(slot) => slot,
            Err(e) => {
                warn!(error = %e, "slot preparation failed");
                return Ok(ExecutionResult::setup_failed(format!(
                    "failed to prepare sandbox: {e}"
                )));
            }
        };

        let limits = self.config.effective_limits(&request.limits);

        let mut command = self.config.interpreter.clone();
        command.extend(request.args.iter().cloned());
        if let Err(e) = resolve_command(&mut command) {
            self.pool.release(slot).await;
            return Ok(ExecutionResult::setup_failed(format!(
                "interpreter not available: {e}"
            )));
        }

        let args = match self.jail_args(&slot, limits.clone(), command) {
            Ok(args) => args,
            Err(e) => {
                self.pool.release(slot).await;
                return Ok(ExecutionResult::setup_failed(e.to_string()));
            }
        };

        // The watchdog owns timeout classification: it fires at the
        // request's wall limit, strictly below nsjail's own backstop kill.
        let wall = limits.wall_time.unwrap_or(FALLBACK_DEADLINE_SECS);
        let deadline = Duration::from_secs_f64(wall);
        let output_cap = limits.max_output.unwrap_or(u64::MAX);

        let raw = match run_jailed(&slot, args, request.code.into_bytes(), output_cap, deadline)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "jailed execution failed");
                self.pool.release(slot).await;
                return Ok(ExecutionResult::setup_failed(format!(
                    "sandbox execution failed: {e}"
                )));
            }
        };

        let mut result = collect(raw, limits.memory);

        match slot
            .attachments(self.config.max_attachments, self.config.max_attachment_size)
            .await
        {
            Ok(attachments) => result.attachments = attachments,
            Err(e) => warn!(error = %e, "failed to collect output files"),
        }

        self.pool.release(slot).await;
        Ok(result)
    }

    /// Render the full nsjail argument vector for one submission
    fn jail_args(
        &self,
        slot: &Slot,
        limits: ResourceLimits,
        command: Vec<String>,
    ) -> Result<Vec<String>, SandboxError> {
        let home_mount = slot
            .home_mount()
            .ok_or(SandboxError::InvalidPath("slot has no scratch space".to_string()))?;

        let mut jail = NsjailCommand::new(self.config.nsjail_binary())
            .limits(limits)
            .mounts(self.config.sandbox_mounts.iter().cloned())
            .mount(home_mount)
            .user(self.config.uid, self.config.gid)
            .working_dir("/home")
            .command(command);

        if let Some(ref cache) = self.config.package_cache {
            jail = jail.mount(cache.clone());
        }
        for (key, value) in &self.config.env {
            jail = jail.env(key, value);
        }
        if let Some(cg) = slot.cgroup_path() {
            jail = jail.cgroup_dir(cg);
        }
        if let Some(log) = slot.log_path() {
            jail = jail.log_file(log);
        }

        Ok(jail.build())
    }

    /// The configuration this coordinator runs with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Slots currently free
    pub fn available_slots(&self) -> usize {
        self.pool.available()
    }

    /// Slots taken out of rotation after failed teardown
    pub fn quarantined_slots(&self) -> usize {
        self.pool.quarantined()
    }
}
