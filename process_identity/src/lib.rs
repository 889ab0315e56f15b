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

//! Probes for the process-identity facts the Lock Service needs to decide
//! whether a lock holder is still alive: the current pid, a pid's start time,
//! and a boot id that distinguishes this boot of the machine from any other
//! (so that a pid recorded before a reboot is never mistaken for a live one).
//!
//! Modeled as a trait so the Dataflow Engine and Lock Service can be tested
//! against a deterministic fake rather than the real OS, the same split
//! `pantsd::probe` draws between reading recorded metadata and checking it
//! against `sysinfo`.

use std::fs;

use sysinfo::{Pid, PidExt, ProcessExt, System, SystemExt};

/// Probes the facts needed to identify a process and tell whether it is
/// still the same process that was running earlier (as opposed to a new,
/// unrelated process that happens to reuse the same pid).
pub trait ProcessIdentity: Send + Sync {
    /// The pid of the current process.
    fn current_pid(&self) -> u32;

    /// The start time of `pid`, in seconds since the Unix epoch, or `None` if
    /// no such process exists right now.
    fn start_time(&self, pid: u32) -> Option<u64>;

    /// An identifier for the current boot of the machine. Stable across the
    /// life of the machine; changes (or is meaningless to compare) across a
    /// reboot.
    fn boot_id(&self) -> String;

    /// Whether the process identified by `(pid, start_time)` is still alive
    /// on the boot identified by `boot_id`. A holder recorded on a prior
    /// boot is never alive, even if the same pid happens to be running now.
    fn is_alive(&self, pid: u32, start_time: u64, boot_id: &str) -> bool {
        if boot_id != self.boot_id() {
            return false;
        }
        self.start_time(pid) == Some(start_time)
    }
}

/// The real `ProcessIdentity`, backed by `sysinfo` and `/proc`.
#[derive(Debug, Default)]
pub struct SystemProcessIdentity;

impl SystemProcessIdentity {
    pub fn new() -> SystemProcessIdentity {
        SystemProcessIdentity
    }
}

impl ProcessIdentity for SystemProcessIdentity {
    fn current_pid(&self) -> u32 {
        std::process::id()
    }

    fn start_time(&self, pid: u32) -> Option<u64> {
        let mut system = System::new();
        let sysinfo_pid = Pid::from_u32(pid);
        if !system.refresh_process(sysinfo_pid) {
            return None;
        }
        system.process(sysinfo_pid).map(ProcessExt::start_time)
    }

    fn boot_id(&self) -> String {
        // Linux exposes a per-boot random id; every other platform falls back to a
        // constant, which makes `is_alive` degrade to "same pid, same start time"
        // (no protection against cross-reboot pid reuse, but still correct within
        // a single boot, which is the only case those platforms are tested under).
        fs::read_to_string("/proc/sys/kernel/random/boot_id")
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "unknown-boot".to_string())
    }
}

/// A deterministic, in-memory `ProcessIdentity` for tests: every `(pid,
/// start_time)` the caller registers as alive reports alive; nothing else
/// does.
#[derive(Debug, Default)]
pub struct FakeProcessIdentity {
    pub pid: u32,
    pub boot_id: String,
    alive: std::sync::Mutex<std::collections::HashMap<u32, u64>>,
}

impl FakeProcessIdentity {
    pub fn new(pid: u32, boot_id: impl Into<String>) -> FakeProcessIdentity {
        FakeProcessIdentity {
            pid,
            boot_id: boot_id.into(),
            alive: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Marks `pid` as alive with the given start time, as observed by
    /// `start_time`/`is_alive`.
    pub fn mark_alive(&self, pid: u32, start_time: u64) {
        self.alive.lock().unwrap().insert(pid, start_time);
    }

    /// Marks `pid` as no longer alive (e.g. to simulate a crashed holder).
    pub fn mark_dead(&self, pid: u32) {
        self.alive.lock().unwrap().remove(&pid);
    }
}

impl ProcessIdentity for FakeProcessIdentity {
    fn current_pid(&self) -> u32 {
        self.pid
    }

    fn start_time(&self, pid: u32) -> Option<u64> {
        self.alive.lock().unwrap().get(&pid).copied()
    }

    fn boot_id(&self) -> String {
        self.boot_id.clone()
    }
}
