use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::hash::Hash;

/// A single observable event within a `DataflowRun`, in causal emission order.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    Start {
        task: String,
        started_at: SystemTime,
    },
    Complete {
        task: String,
        duration: Duration,
        output_hash: Hash,
    },
    Cached {
        task: String,
        output_hash: Hash,
    },
    Failed {
        task: String,
        exit_code: i32,
    },
    InputUnavailable {
        task: String,
        reason: String,
    },
    Aborted {
        task: Option<String>,
    },
}

impl Event {
    pub fn task_name(&self) -> Option<&str> {
        match self {
            Event::Start { task, .. }
            | Event::Complete { task, .. }
            | Event::Cached { task, .. }
            | Event::Failed { task, .. }
            | Event::InputUnavailable { task, .. } => Some(task.as_str()),
            Event::Aborted { task } => task.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_name_reads_through_every_variant() {
        assert_eq!(
            Event::Start {
                task: "t".to_string(),
                started_at: SystemTime::now()
            }
            .task_name(),
            Some("t")
        );
        assert_eq!(Event::Aborted { task: None }.task_name(), None);
    }

    #[test]
    fn event_round_trips_through_json() {
        let e = Event::Complete {
            task: "merge".to_string(),
            duration: Duration::from_millis(250),
            output_hash: Hash::of_bytes(b"out"),
        };
        let bytes = serde_json::to_vec(&e).unwrap();
        let back: Event = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, e);
    }
}
