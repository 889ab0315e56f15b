use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hash::{digest_hashes, Hash};

/// A lexicographically-sortable-by-creation-time execution identifier.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct ExecutionId(Uuid);

impl ExecutionId {
    pub fn new() -> ExecutionId {
        ExecutionId(Uuid::now_v7())
    }

    pub fn to_hex(&self) -> String {
        self.0.simple().to_string()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ExecutionId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(ExecutionId)
            .map_err(|e| format!("malformed execution id: {e}"))
    }
}

/// Computes the deterministic cache key over an ordered list of input hashes.
pub fn inputs_hash(input_hashes: &[Hash]) -> Hash {
    digest_hashes(input_hashes)
}

/// The recorded outcome of one attempt at running a task, keyed by
/// `(taskHash, inputsHash, executionId)`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running {
        execution_id: ExecutionId,
        input_hashes: Vec<Hash>,
        started_at: SystemTime,
        pid: u32,
        pid_start_time: u64,
        boot_id: String,
    },
    Success {
        execution_id: ExecutionId,
        input_hashes: Vec<Hash>,
        output_hash: Hash,
        started_at: SystemTime,
        completed_at: SystemTime,
    },
    Failed {
        execution_id: ExecutionId,
        input_hashes: Vec<Hash>,
        started_at: SystemTime,
        completed_at: SystemTime,
        exit_code: i32,
    },
    Error {
        execution_id: ExecutionId,
        input_hashes: Vec<Hash>,
        started_at: SystemTime,
        completed_at: SystemTime,
        message: String,
    },
}

impl ExecutionStatus {
    pub fn execution_id(&self) -> ExecutionId {
        match self {
            ExecutionStatus::Running { execution_id, .. }
            | ExecutionStatus::Success { execution_id, .. }
            | ExecutionStatus::Failed { execution_id, .. }
            | ExecutionStatus::Error { execution_id, .. } => *execution_id,
        }
    }

    pub fn output_hash(&self) -> Option<Hash> {
        match self {
            ExecutionStatus::Success { output_hash, .. } => Some(*output_hash),
            _ => None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("ExecutionStatus serialization is infallible")
    }

    pub fn decode(bytes: &[u8]) -> Result<ExecutionStatus, String> {
        serde_json::from_slice(bytes).map_err(|e| format!("malformed execution status: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inputs_hash_is_order_sensitive_and_deterministic() {
        let a = Hash::of_bytes(b"a");
        let b = Hash::of_bytes(b"b");
        assert_eq!(inputs_hash(&[a, b]), inputs_hash(&[a, b]));
        assert_ne!(inputs_hash(&[a, b]), inputs_hash(&[b, a]));
    }

    #[test]
    fn execution_id_is_lexicographically_sortable_by_creation() {
        let first = ExecutionId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = ExecutionId::new();
        assert!(first.to_string() < second.to_string());
    }

    #[test]
    fn status_round_trips_through_encode_decode() {
        let now = SystemTime::now();
        let status = ExecutionStatus::Success {
            execution_id: ExecutionId::new(),
            input_hashes: vec![Hash::of_bytes(b"x")],
            output_hash: Hash::of_bytes(b"out"),
            started_at: now,
            completed_at: now,
        };
        assert_eq!(ExecutionStatus::decode(&status.encode()).unwrap(), status);
    }
}
