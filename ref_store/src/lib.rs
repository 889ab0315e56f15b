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

//! C2: mutable, atomically-swapped refs, one sub-namespace per §4.2 kind.
//!
//! Every writer either commits its new value via `rename` or leaves the
//! previous one untouched -- no torn states are observable, mirroring the
//! Object Store's stage-then-rename discipline but for small, frequently
//! overwritten values rather than immutable blobs.

mod atomic;
mod executions;
mod packages;
mod runs;
mod workspaces;

use std::path::PathBuf;

pub use executions::ExecutionRefs;
pub use packages::PackageRefs;
pub use runs::RunRefs;
pub use workspaces::WorkspaceRefs;

/// A facade bundling the four ref sub-namespaces over one shared base
/// directory, for callers (the Dataflow Engine, the CLI) that need more than
/// one kind.
#[derive(Clone, Debug)]
pub struct RefStore {
    pub packages: PackageRefs,
    pub workspaces: WorkspaceRefs,
    pub executions: ExecutionRefs,
    pub runs: RunRefs,
}

impl RefStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> RefStore {
        let base_dir = base_dir.into();
        RefStore {
            packages: PackageRefs::new(base_dir.clone()),
            workspaces: WorkspaceRefs::new(base_dir.clone()),
            executions: ExecutionRefs::new(base_dir.clone()),
            runs: RunRefs::new(base_dir),
        }
    }
}
