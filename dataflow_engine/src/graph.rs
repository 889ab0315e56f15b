//! Task-DAG construction and the pure, storage-free readiness queries the
//! scheduler loop in `engine.rs` drives (§4.6.1, §4.6.8).

use std::collections::{BTreeMap, BTreeSet, HashMap};

use model::{DataflowError, Hash, TaskObject, TreePath};
use petgraph::algo::{kosaraju_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};

/// One task, decoded from its `TaskObject` plus the name it was registered
/// under in the owning `PackageObject`.
#[derive(Clone, Debug)]
pub struct TaskNode {
    pub name: String,
    pub task_hash: Hash,
    pub inputs: Vec<TreePath>,
    pub output: TreePath,
}

/// A task-DAG derived from one package's tasks: nodes plus both directions
/// of the dependency edges, so readiness and skip-propagation queries never
/// need to re-walk the task list.
#[derive(Clone, Debug)]
pub struct Graph {
    /// Sorted by name; `PackageObject::tasks` is already a `BTreeMap`, this
    /// just keeps the invariant explicit for callers of this type.
    pub tasks: Vec<TaskNode>,
    pub depends_on: BTreeMap<String, BTreeSet<String>>,
    pub dependents: BTreeMap<String, BTreeSet<String>>,
}

impl Graph {
    pub fn task(&self, name: &str) -> Option<&TaskNode> {
        self.tasks.iter().find(|t| t.name == name)
    }
}

/// Builds the DAG for one package's tasks. Fails with `DuplicateOutput` if
/// two tasks claim the same output path, and `CycleDetected` if the implied
/// dependency edges are not acyclic (§4.6.1).
pub fn build_graph(tasks: Vec<(String, Hash, TaskObject)>) -> Result<Graph, DataflowError> {
    let mut nodes: Vec<TaskNode> = tasks
        .into_iter()
        .map(|(name, task_hash, task)| TaskNode {
            name,
            task_hash,
            inputs: task.inputs,
            output: task.output,
        })
        .collect();
    nodes.sort_by(|a, b| a.name.cmp(&b.name));

    let mut producer_of: HashMap<TreePath, String> = HashMap::new();
    for node in &nodes {
        if let Some(existing) = producer_of.insert(node.output.clone(), node.name.clone()) {
            return Err(DataflowError::DuplicateOutput(format!(
                "{} is produced by both {existing} and {}",
                node.output, node.name
            )));
        }
    }

    let mut depends_on: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut dependents: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for node in &nodes {
        dependents.entry(node.name.clone()).or_default();
        let mut deps = BTreeSet::new();
        for input in &node.inputs {
            if let Some(producer) = producer_of.get(input) {
                if producer != &node.name {
                    deps.insert(producer.clone());
                }
            }
        }
        depends_on.insert(node.name.clone(), deps);
    }
    for (task, deps) in &depends_on {
        for dep in deps {
            dependents.entry(dep.clone()).or_default().insert(task.clone());
        }
    }

    check_acyclic(&nodes, &depends_on)?;

    Ok(Graph {
        tasks: nodes,
        depends_on,
        dependents,
    })
}

fn check_acyclic(
    nodes: &[TaskNode],
    depends_on: &BTreeMap<String, BTreeSet<String>>,
) -> Result<(), DataflowError> {
    let mut graph = DiGraph::<&str, ()>::new();
    let mut index_of: HashMap<&str, NodeIndex> = HashMap::new();
    for node in nodes {
        index_of.insert(node.name.as_str(), graph.add_node(node.name.as_str()));
    }
    for (task, deps) in depends_on {
        for dep in deps {
            // Edge dep -> task: dep must complete before task becomes ready.
            graph.add_edge(index_of[dep.as_str()], index_of[task.as_str()], ());
        }
    }
    if toposort(&graph, None).is_ok() {
        return Ok(());
    }

    let mut cycle_names: Vec<String> = kosaraju_scc(&graph)
        .into_iter()
        .find(|scc| scc.len() > 1 || has_self_loop(&graph, scc[0]))
        .map(|scc| scc.into_iter().map(|idx| graph[idx].to_string()).collect())
        .unwrap_or_default();
    cycle_names.sort();
    Err(DataflowError::CycleDetected(cycle_names))
}

fn has_self_loop(graph: &DiGraph<&str, ()>, node: NodeIndex) -> bool {
    graph.neighbors(node).any(|n| n == node)
}

/// Tasks whose dependencies are all completed and which are not themselves
/// completed, blocked (failed/errored/skipped), or already running, in
/// stable lexicographic order (§4.6.8).
///
/// When `filter` is set, readiness is overridden: only that task is ever
/// ready, and its own `dependsOn` is ignored (its inputs are still resolved
/// against the live workspace tree by the caller).
pub fn get_ready_tasks(
    graph: &Graph,
    completed: &BTreeSet<String>,
    blocked: &BTreeSet<String>,
    running: &BTreeSet<String>,
    filter: Option<&str>,
) -> Vec<String> {
    if let Some(filter) = filter {
        let already_seen = completed.contains(filter)
            || blocked.contains(filter)
            || running.contains(filter);
        return if already_seen {
            Vec::new()
        } else {
            vec![filter.to_string()]
        };
    }

    graph
        .tasks
        .iter()
        .map(|t| t.name.as_str())
        .filter(|name| {
            !completed.contains(*name) && !blocked.contains(*name) && !running.contains(*name)
        })
        .filter(|name| {
            graph.depends_on[*name]
                .iter()
                .all(|dep| completed.contains(dep))
        })
        .map(str::to_string)
        .collect()
}

/// Every task transitively downstream of `from_task` that is not already
/// completed or blocked, in stable lexicographic order (§4.6.2, the
/// diamond-with-upstream-failure scenario in §8).
pub fn get_dependents_to_skip(
    graph: &Graph,
    from_task: &str,
    completed: &BTreeSet<String>,
    blocked: &BTreeSet<String>,
) -> Vec<String> {
    let mut result = BTreeSet::new();
    let mut stack = vec![from_task.to_string()];
    let mut visited: BTreeSet<String> = BTreeSet::new();
    while let Some(task) = stack.pop() {
        if !visited.insert(task.clone()) {
            continue;
        }
        let Some(dependents) = graph.dependents.get(&task) else {
            continue;
        };
        for dependent in dependents {
            if completed.contains(dependent) || blocked.contains(dependent) {
                continue;
            }
            if result.insert(dependent.clone()) {
                stack.push(dependent.clone());
            }
        }
    }
    result.into_iter().collect()
}
