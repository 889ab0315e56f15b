// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! A child process running in its own process group, killable as a whole.
//! Adapted from `process_execution`'s `ManagedChild`: the one change is that
//! shutdown here is driven by the async executor's own timer rather than a
//! blocking `thread::sleep` poll loop, since the Task Runner already lives
//! inside a tokio runtime.

use std::ops::{Deref, DerefMut};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nix::sys::signal;
use nix::unistd::{getpgid, Pid};
use tokio::process::{Child, Command};

pub struct ManagedChild {
    child: Child,
    graceful_shutdown_timeout: Duration,
    killed: AtomicBool,
}

impl ManagedChild {
    pub fn spawn(
        mut command: Command,
        graceful_shutdown_timeout: Duration,
    ) -> Result<ManagedChild, String> {
        command.kill_on_drop(true);

        // Give the child its own PGID so the whole subtree can be signalled later.
        unsafe {
            command.pre_exec(|| {
                nix::unistd::setsid().map(|_pgid| ()).map_err(|e| {
                    std::io::Error::new(
                        std::io::ErrorKind::Other,
                        format!("could not create new pgid: {e}"),
                    )
                })
            });
        };

        let child = command
            .spawn()
            .map_err(|e| format!("failed to spawn process: {e}"))?;
        Ok(ManagedChild {
            child,
            graceful_shutdown_timeout,
            killed: AtomicBool::new(false),
        })
    }

    fn get_pgid(&self) -> Result<Pid, String> {
        let pid = self.id().ok_or_else(|| "process had no pid".to_string())?;
        getpgid(Some(Pid::from_raw(pid as i32)))
            .map_err(|e| format!("could not get process group id: {e}"))
    }

    fn signal_pg<T: Into<Option<signal::Signal>>>(&self, signal: T) -> Result<(), String> {
        let pgid = self.get_pgid()?;
        // A negative pid signals the whole process group.
        signal::kill(Pid::from_raw(-pgid.as_raw()), signal)
            .map_err(|e| format!("failed to signal process group: {e}"))
    }

    /// Sends `SIGINT` to the process group and waits for exit; escalates to
    /// `SIGKILL` if it hasn't exited within `graceful_shutdown_timeout`.
    /// Idempotent: a second call after the group is already dead is a no-op
    /// wait for the already-recorded exit status.
    pub async fn graceful_shutdown(&mut self) -> Result<ExitStatus, String> {
        if !self.killed.swap(true, Ordering::SeqCst) {
            if let Err(e) = self.signal_pg(signal::Signal::SIGINT) {
                log::warn!("failed to send SIGINT to process group: {e}");
            }
            let exited = tokio::time::timeout(self.graceful_shutdown_timeout, self.child.wait())
                .await
                .is_ok();
            if !exited {
                log::warn!("process group did not exit after SIGINT; sending SIGKILL");
                if let Err(e) = self.signal_pg(signal::Signal::SIGKILL) {
                    log::warn!("failed to send SIGKILL to process group: {e}");
                }
            }
        }
        self.child
            .wait()
            .await
            .map_err(|e| format!("failed to wait for process: {e}"))
    }
}

impl Deref for ManagedChild {
    type Target = Child;

    fn deref(&self) -> &Child {
        &self.child
    }
}

impl DerefMut for ManagedChild {
    fn deref_mut(&mut self) -> &mut Child {
        &mut self.child
    }
}

/// Best-effort: if the process group was never killed through
/// `graceful_shutdown`, send it a `SIGKILL` synchronously rather than leave
/// it running. `kill_on_drop` already asks tokio to reap the immediate
/// child; this additionally reaches the rest of its process group.
impl Drop for ManagedChild {
    fn drop(&mut self) {
        if !self.killed.swap(true, Ordering::SeqCst) {
            let _ = self.signal_pg(signal::Signal::SIGKILL);
        }
    }
}
