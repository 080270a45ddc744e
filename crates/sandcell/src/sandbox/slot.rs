//! Slot lifecycle management
//!
//! A slot is one exclusively-owned unit of isolation capacity: an ephemeral
//! scratch directory (with a writable `home/` that gets bind-mounted into
//! the jail) and, in cgroup mode, a per-slot cgroup leaf. Slots are handed
//! out by a bounded pool and torn down after every execution; a slot whose
//! teardown fails is quarantined instead of being reused.

use std::collections::VecDeque;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tempfile::TempDir;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, instrument, warn};

use crate::sandbox::SandboxError;
use crate::types::{FileAttachment, MountConfig};

/// An execution slot
///
/// Owned exclusively by one in-flight request from acquisition to release.
///
/// # Cleanup
///
/// Always return the slot to its pool via [`SlotPool::release`] (or call
/// [`teardown()`](Self::teardown) directly). A pool-owned slot that is
/// dropped instead (a cancelled request) removes its scratch best-effort
/// and hands its id back to the pool.
#[derive(Debug)]
pub struct Slot {
    /// Slot ID, stable across reuse
    id: u32,

    /// Scratch directory; `None` after teardown
    scratch: Option<TempDir>,

    /// Per-slot cgroup leaf, when the pool runs in cgroup mode
    cgroup_dir: Option<PathBuf>,

    /// Pool permit (if acquired from a pool)
    permit: Option<OwnedSemaphorePermit>,

    /// Shared pool bookkeeping, so a dropped slot can return its id
    pool: Option<Arc<PoolState>>,
}

impl Slot {
    /// Prepare a fresh slot: scratch space with a world-writable `home/`,
    /// plus a cgroup leaf when `cg_root` is given.
    #[instrument(skip(scratch_root, cg_root))]
    pub(crate) async fn prepare(
        id: u32,
        scratch_root: &Path,
        cg_root: Option<&Path>,
    ) -> Result<Self, SandboxError> {
        tokio::fs::create_dir_all(scratch_root)
            .await
            .map_err(|source| SandboxError::ScratchSetup { id, source })?;

        let scratch = tempfile::Builder::new()
            .prefix(&format!("slot-{id}-"))
            .tempdir_in(scratch_root)
            .map_err(|source| SandboxError::ScratchSetup { id, source })?;

        // The jailed process runs as an unprivileged user; home must be
        // writable by anyone.
        let home = scratch.path().join("home");
        tokio::fs::create_dir(&home)
            .await
            .map_err(|source| SandboxError::ScratchSetup { id, source })?;
        tokio::fs::set_permissions(&home, std::fs::Permissions::from_mode(0o777))
            .await
            .map_err(|source| SandboxError::ScratchSetup { id, source })?;

        let cgroup_dir = match cg_root {
            Some(root) => {
                let dir = root.join(format!("slot-{id}"));
                tokio::fs::create_dir_all(&dir)
                    .await
                    .map_err(|source| SandboxError::CgroupSetup { id, source })?;
                Some(dir)
            }
            None => None,
        };

        debug!(scratch = ?scratch.path(), ?cgroup_dir, "slot prepared");

        Ok(Self {
            id,
            scratch: Some(scratch),
            cgroup_dir,
            permit: None,
            pool: None,
        })
    }

    /// Get the slot ID
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Host path of the slot's scratch directory
    pub fn scratch_path(&self) -> Option<&Path> {
        self.scratch.as_ref().map(TempDir::path)
    }

    /// Host path of the writable home directory bind-mounted at `/home`
    pub fn home_path(&self) -> Option<PathBuf> {
        self.scratch_path().map(|p| p.join("home"))
    }

    /// Host path for the jail's own log output
    pub fn log_path(&self) -> Option<PathBuf> {
        self.scratch_path().map(|p| p.join("nsjail.log"))
    }

    /// The slot's cgroup leaf, when running in cgroup mode
    pub fn cgroup_path(&self) -> Option<&Path> {
        self.cgroup_dir.as_deref()
    }

    /// Mount mapping the slot's home into the jail, read-write
    pub fn home_mount(&self) -> Option<MountConfig> {
        self.home_path().map(|home| MountConfig {
            source: home.to_string_lossy().into_owned(),
            target: "/home".to_string(),
            writable: true,
            optional: false,
        })
    }

    /// Collect output files the jailed code left in its home directory.
    ///
    /// Only regular files whose name starts with `output` directly under
    /// home are picked up, at most `max_files` of them in name order.
    /// Files larger than `max_size` bytes are skipped with a warning.
    #[instrument(skip(self))]
    pub async fn attachments(
        &self,
        max_files: usize,
        max_size: u64,
    ) -> Result<Vec<FileAttachment>, SandboxError> {
        let Some(home) = self.home_path() else {
            return Ok(Vec::new());
        };

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&home).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with("output") {
                continue;
            }
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            if meta.len() > max_size {
                warn!(name, size = meta.len(), "skipping oversized attachment");
                continue;
            }
            names.push(name);
        }
        names.sort();
        names.truncate(max_files);

        let mut attachments = Vec::with_capacity(names.len());
        for name in names {
            let content = tokio::fs::read(home.join(&name)).await?;
            attachments.push(FileAttachment {
                path: name,
                content,
            });
        }
        Ok(attachments)
    }

    /// Tear down the slot: remove the scratch space and the cgroup leaf.
    ///
    /// The return value must be checked; a slot that failed teardown may
    /// still hold resources and must not be reused.
    #[must_use = "teardown errors decide whether the slot can be reused"]
    #[instrument(skip(self))]
    pub async fn teardown(&mut self) -> Result<(), SandboxError> {
        if let Some(scratch) = self.scratch.take() {
            scratch.close().map_err(|e| SandboxError::TeardownFailed {
                id: self.id,
                message: format!("scratch removal failed: {e}"),
            })?;
        }

        if let Some(dir) = self.cgroup_dir.take() {
            remove_cgroup_dir(&self.id, &dir).await?;
        }

        debug!("slot torn down");
        Ok(())
    }

    /// Attach a pool permit to this slot
    pub(crate) fn with_permit(mut self, permit: OwnedSemaphorePermit) -> Self {
        self.permit = Some(permit);
        self
    }

    /// Detach the pool permit, if any
    pub(crate) fn take_permit(&mut self) -> Option<OwnedSemaphorePermit> {
        self.permit.take()
    }

    /// Attach the pool's shared bookkeeping to this slot
    pub(crate) fn with_pool(mut self, pool: Arc<PoolState>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Detach the pool bookkeeping; the caller takes over the id's fate
    pub(crate) fn take_pool(&mut self) -> Option<Arc<PoolState>> {
        self.pool.take()
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            // A dropped in-flight slot (a cancelled submission) releases
            // its permit implicitly, so the id must re-enter the free list
            // in the same step; otherwise the permit count and the free
            // list drift apart and the pool wedges. The TempDir drop
            // removes the scratch tree best-effort; a leftover cgroup leaf
            // is reused and swept on this id's next teardown.
            pool.push_front(self.id);
            warn!(
                slot_id = self.id,
                "slot dropped without teardown; id returned to the pool"
            );
        } else if self.scratch.is_some() || self.cgroup_dir.is_some() {
            warn!(
                slot_id = self.id,
                "Slot dropped without explicit teardown; release it through SlotPool::release"
            );
        }
    }
}

/// Remove a slot's cgroup leaf, including empty child cgroups the jail
/// created inside it. cgroupfs directories cannot be removed recursively,
/// so children are removed one by one; a child that still has processes
/// makes the teardown fail.
async fn remove_cgroup_dir(id: &u32, dir: &Path) -> Result<(), SandboxError> {
    let fail = |e: std::io::Error| SandboxError::TeardownFailed {
        id: *id,
        message: format!("cgroup removal failed: {e}"),
    };

    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => {
            while let Some(entry) = entries.next_entry().await.map_err(fail)? {
                let meta = entry.metadata().await.map_err(fail)?;
                if meta.is_dir() {
                    tokio::fs::remove_dir(entry.path()).await.map_err(fail)?;
                }
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(fail(e)),
    }

    match tokio::fs::remove_dir(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(fail(e)),
    }
}

/// Id bookkeeping shared between the pool and its outstanding slots.
///
/// Invariant: whenever a semaphore permit is available, a matching id is in
/// the free list (or the permit was forgotten alongside a quarantined id).
/// Outstanding slots hold an `Arc` to this state so the id finds its way
/// back on every path, including drops.
#[derive(Debug)]
pub(crate) struct PoolState {
    free: Mutex<VecDeque<u32>>,
    quarantined: Mutex<Vec<u32>>,
}

impl PoolState {
    fn new(capacity: u32) -> Self {
        Self {
            free: Mutex::new((0..capacity).collect()),
            quarantined: Mutex::new(Vec::new()),
        }
    }

    fn pop(&self) -> Option<u32> {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn push_back(&self, id: u32) {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(id);
    }

    fn push_front(&self, id: u32) {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_front(id);
    }

    fn quarantine(&self, id: u32) {
        self.quarantined
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id);
    }

    fn quarantined_count(&self) -> usize {
        self.quarantined
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Returns a popped id to the free list unless disarmed.
///
/// Covers the window between popping an id and attaching it to a prepared
/// slot: both a failed prepare and a cancelled acquire restore the id.
struct FreeIdGuard<'a> {
    state: &'a PoolState,
    id: Option<u32>,
}

impl Drop for FreeIdGuard<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.state.push_front(id);
        }
    }
}

/// Bounded pool of execution slots
///
/// Hands out at most `capacity` slots at a time; waiters are served in
/// arrival order. A slot whose teardown fails is quarantined: its id never
/// re-enters the free list and the pool's effective capacity shrinks by one.
#[derive(Debug)]
pub struct SlotPool {
    /// Number of slots the pool started with
    capacity: u32,

    /// Root directory under which per-slot scratch dirs are created
    scratch_root: PathBuf,

    /// Parent cgroup for per-slot leaves; `None` disables cgroup limits
    cg_root: Option<PathBuf>,

    /// Free and quarantined ids, shared with outstanding slots
    state: Arc<PoolState>,

    /// Counting semaphore bounding concurrent executions; FIFO by
    /// construction, which gives fair slot acquisition
    semaphore: Arc<Semaphore>,
}

impl SlotPool {
    /// Create a new slot pool
    pub fn new(capacity: u32, scratch_root: impl Into<PathBuf>, cg_root: Option<PathBuf>) -> Self {
        Self {
            capacity,
            scratch_root: scratch_root.into(),
            cg_root,
            state: Arc::new(PoolState::new(capacity)),
            semaphore: Arc::new(Semaphore::new(capacity as usize)),
        }
    }

    /// Acquire a slot, waiting in FIFO order if none is free
    #[instrument(skip(self))]
    pub async fn acquire(&self) -> Result<Slot, SandboxError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SandboxError::PoolClosed)?;

        // A permit guarantees a free id unless the pool is corrupted
        let id = self.state.pop().ok_or(SandboxError::PoolClosed)?;
        let mut guard = FreeIdGuard {
            state: &self.state,
            id: Some(id),
        };

        debug!(id, "acquired slot from pool");

        let slot = Slot::prepare(id, &self.scratch_root, self.cg_root.as_deref()).await?;

        // From here the slot itself carries the id back
        guard.id = None;
        Ok(slot
            .with_permit(permit)
            .with_pool(Arc::clone(&self.state)))
    }

    /// Release a slot back to the pool.
    ///
    /// Teardown always runs. On success the slot id re-enters the free
    /// list; on failure it is quarantined and the pool's capacity shrinks,
    /// so a half-clean slot is never handed to another request.
    #[instrument(skip(self, slot), fields(id = slot.id()))]
    pub async fn release(&self, mut slot: Slot) {
        let id = slot.id();
        match slot.teardown().await {
            Ok(()) => {
                slot.take_pool();
                self.state.push_back(id);
                // Dropping the slot (and its permit) frees the capacity
            }
            Err(e) => {
                warn!(id, error = %e, "slot teardown failed; quarantining slot");
                slot.take_pool();
                self.state.quarantine(id);
                if let Some(permit) = slot.take_permit() {
                    // Shrink capacity permanently
                    permit.forget();
                }
            }
        }
    }

    /// Number of slots currently free to acquire
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Number of slots the pool was created with
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of slots quarantined after failed teardown
    pub fn quarantined(&self) -> usize {
        self.state.quarantined_count()
    }
}
