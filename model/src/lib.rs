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

//! Shared data model for the dataflow execution engine: content-addressed hashes,
//! the package/workspace data tree, execution status, and the observable event
//! stream of a dataflow run.

mod error;
mod event;
mod execution;
mod hash;
mod package;
mod run;
mod tree;
mod workspace;

pub use error::DataflowError;
pub use event::Event;
pub use execution::{inputs_hash, ExecutionId, ExecutionStatus};
pub use hash::Hash;
pub use package::{PackageObject, Structure, TaskObject};
pub use run::{DataflowRun, RunId, RunStatus, RunSummary};
pub use tree::{DataRef, PathSegment, Tree, TreePath};
pub use workspace::WorkspaceState;
