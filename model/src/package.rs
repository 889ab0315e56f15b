use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hash::Hash;
use crate::tree::{Structure, TreePath};

/// A named function declaration: an ordered list of input paths and a single
/// output path, resolved to an argv at execution time by evaluating
/// `command_ir` against scratch paths for those inputs/output.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TaskObject {
    pub command_ir: Hash,
    pub inputs: Vec<TreePath>,
    pub output: TreePath,
}

impl TaskObject {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("TaskObject serialization is infallible")
    }

    pub fn decode(bytes: &[u8]) -> Result<TaskObject, String> {
        serde_json::from_slice(bytes).map_err(|e| format!("malformed task object: {e}"))
    }
}

/// An immutable bundle of a data structure and a set of named tasks.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PackageObject {
    pub structure: Structure,
    pub data: Hash,
    /// task name -> Hash(TaskObject), in no particular order (graph
    /// construction imposes its own stable ordering).
    pub tasks: BTreeMap<String, Hash>,
}

impl PackageObject {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("PackageObject serialization is infallible")
    }

    pub fn decode(bytes: &[u8]) -> Result<PackageObject, String> {
        serde_json::from_slice(bytes).map_err(|e| format!("malformed package object: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::TreePath;

    #[test]
    fn task_object_round_trips() {
        let t = TaskObject {
            command_ir: Hash::of_bytes(b"ir"),
            inputs: vec![TreePath::field("a"), TreePath::field("b")],
            output: TreePath::field("c"),
        };
        assert_eq!(TaskObject::decode(&t.encode()).unwrap(), t);
    }

    #[test]
    fn package_object_round_trips() {
        let mut tasks = BTreeMap::new();
        tasks.insert("compute".to_string(), Hash::of_bytes(b"task"));
        let p = PackageObject {
            structure: Structure::Struct(vec![("x".to_string(), Structure::Value)]),
            data: Hash::of_bytes(b"data"),
            tasks,
        };
        assert_eq!(PackageObject::decode(&p.encode()).unwrap(), p);
    }
}
