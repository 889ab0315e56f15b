use std::sync::Arc;

use lock_service::LockHandle;
use model::{DataflowError, Hash, RunId, RunStatus, RunSummary, TreePath};
use task_runner::CancellationSignal;

/// Default `concurrency` when `ExecuteOptions::concurrency` is unset (§4.6.4).
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Options recognised by `dataflowExecute`/`dataflowStart` (§4.6.7).
#[derive(Clone, Default)]
pub struct ExecuteOptions {
    pub force: bool,
    /// Restrict execution to a single named task, ignoring its `dependsOn`
    /// for readiness (its inputs must still resolve from the workspace
    /// tree). Unknown name surfaces as `task_not_found`.
    pub filter: Option<String>,
    pub concurrency: Option<usize>,
    pub signal: Option<CancellationSignal>,
    /// A pre-acquired workspace lock. When set, the Engine uses it instead
    /// of acquiring its own and does not release it on exit (§4.6.5).
    pub lock: Option<Arc<LockHandle>>,
}

/// The terminal (or not-yet-reached) state of one task within a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskState {
    /// Never dispatched: the run ended (aborted, or an earlier precondition
    /// failure) before this task's turn came up.
    Pending,
    Success,
    Failed,
    /// A Task Runner-internal fault (decode/evaluator/io) or a structural
    /// violation in the workspace tree, as distinct from a non-zero exit
    /// code (§7 point 3). Counted alongside `Failed` in `RunSummary`.
    Error,
    Skipped,
}

/// One task's outcome in a finished (or aborted) run's task list.
#[derive(Clone, Debug)]
pub struct TaskOutcome {
    pub name: String,
    pub state: TaskState,
    pub output_hash: Option<Hash>,
    pub exit_code: Option<i32>,
    pub cached: bool,
}

impl TaskOutcome {
    pub(crate) fn pending(name: impl Into<String>) -> TaskOutcome {
        TaskOutcome {
            name: name.into(),
            state: TaskState::Pending,
            output_hash: None,
            exit_code: None,
            cached: false,
        }
    }
}

/// The result of a blocking `dataflowExecute` call.
#[derive(Clone, Debug)]
pub struct DataflowExecuteResult {
    pub run_id: RunId,
    pub success: bool,
    pub executed: usize,
    pub cached: usize,
    pub failed: usize,
    pub skipped: usize,
    pub tasks: Vec<TaskOutcome>,
}

/// The observable state returned by `dataflowExecution`.
#[derive(Clone, Debug)]
pub struct DataflowExecutionState {
    pub status: RunStatus,
    pub summary: Option<RunSummary>,
    pub events: Vec<model::Event>,
    pub total_events: usize,
}

/// One task node as exposed by `dataflowGetGraph`.
#[derive(Clone, Debug)]
pub struct GraphTaskView {
    pub name: String,
    pub hash: Hash,
    pub inputs: Vec<TreePath>,
    pub output: TreePath,
    pub depends_on: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct GraphView {
    pub tasks: Vec<GraphTaskView>,
}

/// The error surface of `dataflow_engine`'s public operations: the shared
/// `DataflowError` codes (§6), plus a richer aborted-run carrier than
/// `model::DataflowError::Aborted`'s bare counts -- callers that need to
/// know exactly which tasks had already finished when a run was cancelled
/// (§4.6.6, the cancellation scenario in §8) read `tasks` here.
#[derive(Debug)]
pub enum EngineError {
    Dataflow(DataflowError),
    Aborted {
        summary: RunSummary,
        tasks: Vec<TaskOutcome>,
    },
}

impl From<DataflowError> for EngineError {
    fn from(e: DataflowError) -> EngineError {
        EngineError::Dataflow(e)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Dataflow(e) => write!(f, "{e}"),
            EngineError::Aborted { summary, .. } => write!(
                f,
                "dataflow run aborted: {} executed ({} cached), {} failed, {} skipped before cancellation",
                summary.executed, summary.cached, summary.failed, summary.skipped
            ),
        }
    }
}

impl std::error::Error for EngineError {}
