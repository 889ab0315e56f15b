// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
#![allow(clippy::match_ref_pats)]
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]
#![allow(clippy::mutex_atomic)]

//! C3: exclusive advisory locks on `(repo, resource)`, with holder identity
//! and a liveness probe that reclaims locks left behind by dead holders.
//!
//! A lock is a single file created with `O_CREAT | O_EXCL` (`create_new`):
//! the same "create or fail" primitive `local::setup_run_sh_script` uses to
//! guarantee a sandbox's `__run.sh` is written exactly once, generalised here
//! into the mutual-exclusion primitive the Dataflow Engine needs around a
//! workspace.

mod holder;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

pub use holder::Holder;
use process_identity::ProcessIdentity;
use serde::{Deserialize, Serialize};

/// The persisted shape of a lock: who holds it, for what operation, and
/// since when.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LockState {
    pub holder: Holder,
    pub operation: String,
    pub acquired_at: SystemTime,
}

/// Decides whether a recorded holder is still alive. Injected as a strategy
/// so the same `LockService` code runs against local-process holders (via
/// `process_identity`) or remote-session holders (via an application-defined
/// check), per the "Locking over remote storage" design note.
pub trait LivenessProbe: Send + Sync {
    fn is_alive(&self, holder: &Holder) -> bool;
}

/// The standard probe: local holders are checked against OS process state;
/// remote holders are always presumed alive, since this crate has no
/// transport-level way to ask a remote session whether it is still there.
/// Compose a custom `LivenessProbe` if the host application can answer that.
pub struct StandardLivenessProbe {
    identity: Arc<dyn ProcessIdentity>,
}

impl StandardLivenessProbe {
    pub fn new(identity: Arc<dyn ProcessIdentity>) -> StandardLivenessProbe {
        StandardLivenessProbe { identity }
    }
}

impl LivenessProbe for StandardLivenessProbe {
    fn is_alive(&self, holder: &Holder) -> bool {
        match holder {
            Holder::Local {
                pid,
                start_time,
                boot_id,
                ..
            } => self.identity.is_alive(*pid, *start_time, boot_id),
            Holder::Remote { .. } => true,
        }
    }
}

/// Options controlling how `acquire` behaves when the lock is already held
/// by a live holder.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcquireOptions {
    pub wait: bool,
    pub timeout: Option<Duration>,
}

const POLL_INITIAL_BACKOFF: Duration = Duration::from_millis(20);
const POLL_MAX_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct LockService {
    base_dir: PathBuf,
    probe: Arc<dyn LivenessProbe>,
}

impl LockService {
    pub fn new(base_dir: impl Into<PathBuf>, probe: Arc<dyn LivenessProbe>) -> LockService {
        LockService {
            base_dir: base_dir.into(),
            probe,
        }
    }

    fn lock_path(&self, repo: &str, resource: &str, operation: &str) -> PathBuf {
        self.base_dir
            .join(repo)
            .join("locks")
            .join(resource)
            .join(format!("{operation}.lock"))
    }

    async fn read_record(path: &Path) -> Result<Option<LockState>, String> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| format!("malformed lock record at {}: {e}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(format!("failed to read lock {}: {e}", path.display())),
        }
    }

    async fn try_create(path: &Path, record: &LockState) -> Result<bool, String> {
        let parent = path
            .parent()
            .ok_or_else(|| format!("lock path has no parent: {}", path.display()))?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("failed to create {}: {e}", parent.display()))?;

        let bytes =
            serde_json::to_vec(record).map_err(|e| format!("failed to encode lock record: {e}"))?;
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
        {
            Ok(mut file) => {
                use tokio::io::AsyncWriteExt;
                file.write_all(&bytes)
                    .await
                    .map_err(|e| format!("failed to write lock {}: {e}", path.display()))?;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(format!("failed to create lock {}: {e}", path.display())),
        }
    }

    /// Forcibly replaces whatever lock record exists at `path` with
    /// `record`. Only safe to call once the existing holder, if any, has
    /// been confirmed dead.
    async fn reclaim(path: &Path, record: &LockState) -> Result<(), String> {
        let parent = path
            .parent()
            .ok_or_else(|| format!("lock path has no parent: {}", path.display()))?;
        let tmp_path = parent.join(format!(".tmp-{}", std::process::id()));
        let bytes =
            serde_json::to_vec(record).map_err(|e| format!("failed to encode lock record: {e}"))?;
        tokio::fs::write(&tmp_path, &bytes)
            .await
            .map_err(|e| format!("failed to stage lock reclaim: {e}"))?;
        tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(|e| format!("failed to reclaim lock {}: {e}", path.display()))
    }

    /// Attempts one acquisition pass: create if absent, reclaim if the
    /// existing holder is dead, otherwise report contention.
    async fn try_acquire_once(
        &self,
        path: &Path,
        record: &LockState,
    ) -> Result<bool, String> {
        if Self::try_create(path, record).await? {
            return Ok(true);
        }
        let Some(existing) = Self::read_record(path).await? else {
            // Lock disappeared between our failed create and our read (e.g. the
            // holder released it); retry the create.
            return Ok(Self::try_create(path, record).await?);
        };
        if self.probe.is_alive(&existing.holder) {
            return Ok(false);
        }
        log::info!(
            "reclaiming lock at {} from dead holder {}",
            path.display(),
            existing.holder
        );
        Self::reclaim(path, record).await?;
        Ok(true)
    }

    /// Implements §4.3's acquisition algorithm. Returns `Ok(None)` on
    /// contention with a live holder (after exhausting `wait`/`timeout`, if
    /// set); `Ok(Some(handle))` on success.
    pub async fn acquire(
        &self,
        repo: &str,
        resource: &str,
        operation: &str,
        holder: Holder,
        options: AcquireOptions,
    ) -> Result<Option<LockHandle>, String> {
        let path = self.lock_path(repo, resource, operation);
        let record = LockState {
            holder,
            operation: operation.to_string(),
            acquired_at: SystemTime::now(),
        };

        if self.try_acquire_once(&path, &record).await? {
            return Ok(Some(LockHandle::new(
                self.clone(),
                repo.to_string(),
                resource.to_string(),
                operation.to_string(),
            )));
        }
        if !options.wait {
            return Ok(None);
        }

        let deadline = options.timeout.map(|t| Instant::now() + t);
        let mut backoff = POLL_INITIAL_BACKOFF;
        loop {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Ok(None);
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(POLL_MAX_BACKOFF);
            if self.try_acquire_once(&path, &record).await? {
                return Ok(Some(LockHandle::new(
                    self.clone(),
                    repo.to_string(),
                    resource.to_string(),
                    operation.to_string(),
                )));
            }
        }
    }

    pub async fn get_state(
        &self,
        repo: &str,
        resource: &str,
        operation: &str,
    ) -> Result<Option<LockState>, String> {
        Self::read_record(&self.lock_path(repo, resource, operation)).await
    }

    pub fn is_holder_alive(&self, holder: &Holder) -> bool {
        self.probe.is_alive(holder)
    }

    async fn force_release(&self, repo: &str, resource: &str, operation: &str) -> Result<(), String> {
        let path = self.lock_path(repo, resource, operation);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(format!("failed to release lock {}: {e}", path.display())),
        }
    }
}

/// An acquired lock. Release is idempotent and happens either explicitly via
/// `release`, or best-effort in the background on `Drop` (mirroring
/// `process_execution::local::AsyncDropSandbox`'s pattern of deferring
/// teardown IO to a spawned task rather than blocking the dropping thread).
pub struct LockHandle {
    lock_service: LockService,
    repo: String,
    resource: String,
    operation: String,
    released: AtomicBool,
}

impl LockHandle {
    fn new(
        lock_service: LockService,
        repo: String,
        resource: String,
        operation: String,
    ) -> LockHandle {
        LockHandle {
            lock_service,
            repo,
            resource,
            operation,
            released: AtomicBool::new(false),
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub async fn release(&self) -> Result<(), String> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.lock_service
            .force_release(&self.repo, &self.resource, &self.operation)
            .await
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if self.released.load(Ordering::SeqCst) {
            return;
        }
        let lock_service = self.lock_service.clone();
        let repo = self.repo.clone();
        let resource = self.resource.clone();
        let operation = self.operation.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = lock_service.force_release(&repo, &resource, &operation).await {
                    log::warn!("failed to release lock on drop: {e}");
                }
            });
        } else {
            log::warn!(
                "LockHandle for {resource}/{operation} dropped outside a tokio runtime; lock may leak"
            );
        }
    }
}
