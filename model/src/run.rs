use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::Event;

/// A lexicographically-sortable-by-creation-time dataflow run identifier.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> RunId {
        RunId(Uuid::now_v7())
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(RunId)
            .map_err(|e| format!("malformed run id: {e}"))
    }
}

/// The terminal (or in-flight) status of one Engine invocation over a
/// workspace.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Aborted,
}

/// Per-task-state counters summarising a finished (or in-progress) run.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub executed: usize,
    pub cached: usize,
    pub failed: usize,
    pub skipped: usize,
    pub success: bool,
}

/// The observable record of one Engine invocation over a workspace: status,
/// summary, and an append-only, monotonically-growing event log.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DataflowRun {
    pub run_id: RunId,
    pub workspace: String,
    pub started_at: SystemTime,
    pub completed_at: Option<SystemTime>,
    pub status: RunStatus,
    pub summary: Option<RunSummary>,
    pub events: Vec<Event>,
}

impl DataflowRun {
    pub fn new(workspace: impl Into<String>, started_at: SystemTime) -> DataflowRun {
        DataflowRun {
            run_id: RunId::new(),
            workspace: workspace.into(),
            started_at,
            completed_at: None,
            status: RunStatus::Running,
            summary: None,
            events: Vec::new(),
        }
    }

    pub fn total_events(&self) -> usize {
        self.events.len()
    }

    /// Appends an event. Events are append-only: this never truncates or
    /// reorders the existing log.
    pub fn push_event(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("DataflowRun serialization is infallible")
    }

    pub fn decode(bytes: &[u8]) -> Result<DataflowRun, String> {
        serde_json::from_slice(bytes).map_err(|e| format!("malformed dataflow run: {e}"))
    }
}
