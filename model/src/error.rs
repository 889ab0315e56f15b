use std::fmt;

use crate::run::RunSummary;

/// The error codes surfaced across the Operations surface (§6), plus the
/// `DataflowAborted` carrier for cancellation (§4.6.6, §7).
#[derive(Debug)]
pub enum DataflowError {
    WorkspaceNotFound(String),
    WorkspaceNotDeployed(String),
    WorkspaceLocked(String),
    TaskNotFound(String),
    ExecutionNotFound(String),
    NoActiveExecution(String),
    DuplicateOutput(String),
    CycleDetected(Vec<String>),
    InvalidState(String),
    InternalError(String),
    /// The run was cancelled; partial task outcomes known at abort time.
    Aborted { partial_results: RunSummary },
}

impl fmt::Display for DataflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataflowError::WorkspaceNotFound(ws) => write!(f, "workspace_not_found: {ws}"),
            DataflowError::WorkspaceNotDeployed(ws) => write!(f, "workspace_not_deployed: {ws}"),
            DataflowError::WorkspaceLocked(ws) => {
                write!(f, "workspace_locked: dataflow is already running on {ws}")
            }
            DataflowError::TaskNotFound(name) => write!(f, "task_not_found: {name}"),
            DataflowError::ExecutionNotFound(key) => write!(f, "execution_not_found: {key}"),
            DataflowError::NoActiveExecution(ws) => write!(f, "no_active_execution: {ws}"),
            DataflowError::DuplicateOutput(path) => write!(f, "duplicate_output: {path}"),
            DataflowError::CycleDetected(cycle) => {
                write!(f, "cycle_detected: {}", cycle.join(" -> "))
            }
            DataflowError::InvalidState(msg) => write!(f, "invalid_state: {msg}"),
            DataflowError::InternalError(msg) => write!(f, "internal_error: {msg}"),
            DataflowError::Aborted { partial_results } => write!(
                f,
                "dataflow run aborted: {} executed ({} cached), {} failed, {} skipped before cancellation",
                partial_results.executed,
                partial_results.cached,
                partial_results.failed,
                partial_results.skipped
            ),
        }
    }
}

impl std::error::Error for DataflowError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_locked_message_contains_expected_substrings() {
        let err = DataflowError::WorkspaceLocked("demo".to_string());
        let msg = err.to_string();
        assert!(msg.contains("lock") || msg.contains("running") || msg.contains("busy"));
    }
}
