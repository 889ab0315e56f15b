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

//! C6: the Dataflow Engine. Builds a task-DAG from a deployed workspace's
//! package, drives it to completion with bounded concurrency, and exposes
//! the five public operations of §6: `dataflowGetGraph`, `dataflowExecute`,
//! `dataflowStart`, `dataflowExecution`, `dataflowCancel`.

mod engine;
mod graph;
mod tree;
mod types;

pub use engine::DataflowEngine;
pub use graph::{build_graph, get_dependents_to_skip, get_ready_tasks, Graph, TaskNode};
pub use tree::{resolve_path, write_path, ResolveOutcome};
pub use types::{
    DataflowExecuteResult, DataflowExecutionState, EngineError, ExecuteOptions, GraphTaskView,
    GraphView, TaskOutcome, TaskState, DEFAULT_CONCURRENCY,
};
