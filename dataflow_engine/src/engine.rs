//! C6: the Dataflow Engine itself -- DAG construction glue, workspace
//! locking, and the bounded-concurrency scheduler loop (§4.6).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::SystemTime;

use lock_service::{AcquireOptions, Holder, LockHandle, LockService};
use log_store::{LogStore, LogWindow, Stream};
use model::{
    DataRef, DataflowError, DataflowRun, Event, Hash, PackageObject, RunId, RunStatus, RunSummary,
    TaskObject, WorkspaceState,
};
use object_store::ObjectStore;
use parking_lot::Mutex;
use process_identity::ProcessIdentity;
use ref_store::RefStore;
use task_runner::{
    Cancellation, CancellationSignal, ExecuteOptions as RunnerOptions, TaskResult, TaskRunner,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::graph::{self, Graph};
use crate::tree;
use crate::types::{
    DataflowExecuteResult, DataflowExecutionState, EngineError, ExecuteOptions, GraphTaskView,
    GraphView, TaskOutcome, TaskState, DEFAULT_CONCURRENCY,
};

/// Builds the task-DAG for a workspace's deployed package and schedules
/// ready tasks through a `TaskRunner`, bounded by a concurrency permit and
/// observable through the append-only event log of a `DataflowRun`.
#[derive(Clone)]
pub struct DataflowEngine {
    object_store: Arc<ObjectStore>,
    ref_store: Arc<RefStore>,
    lock_service: Arc<LockService>,
    log_store: Arc<LogStore>,
    task_runner: Arc<dyn TaskRunner>,
    process_identity: Arc<dyn ProcessIdentity>,
    /// One live `Cancellation` per `(repo, workspace)` with a run in flight,
    /// so `dataflowCancel` has something to fire even when the caller of
    /// `dataflowStart` never supplied its own signal.
    active_cancellations: Arc<Mutex<HashMap<(String, String), Cancellation>>>,
}

impl DataflowEngine {
    pub fn new(
        object_store: Arc<ObjectStore>,
        ref_store: Arc<RefStore>,
        lock_service: Arc<LockService>,
        log_store: Arc<LogStore>,
        task_runner: Arc<dyn TaskRunner>,
        process_identity: Arc<dyn ProcessIdentity>,
    ) -> DataflowEngine {
        DataflowEngine {
            object_store,
            ref_store,
            lock_service,
            log_store,
            task_runner,
            process_identity,
            active_cancellations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn load_workspace(&self, repo: &str, ws: &str) -> Result<WorkspaceState, DataflowError> {
        if !self
            .ref_store
            .workspaces
            .created(repo, ws)
            .await
            .map_err(DataflowError::InternalError)?
        {
            return Err(DataflowError::WorkspaceNotFound(ws.to_string()));
        }
        self.ref_store
            .workspaces
            .read(repo, ws)
            .await
            .map_err(DataflowError::InternalError)?
            .ok_or_else(|| DataflowError::WorkspaceNotDeployed(ws.to_string()))
    }

    async fn build_graph_for(
        &self,
        repo: &str,
        ws: &str,
    ) -> Result<(Graph, WorkspaceState), DataflowError> {
        let state = self.load_workspace(repo, ws).await?;
        let package_bytes = self
            .object_store
            .read(repo, &state.package_hash)
            .await
            .map_err(|e| DataflowError::InternalError(e.to_string()))?;
        let package =
            PackageObject::decode(&package_bytes).map_err(DataflowError::InternalError)?;

        let mut tasks = Vec::with_capacity(package.tasks.len());
        for (name, task_hash) in &package.tasks {
            let task_bytes = self
                .object_store
                .read(repo, task_hash)
                .await
                .map_err(|e| DataflowError::InternalError(e.to_string()))?;
            let task = TaskObject::decode(&task_bytes).map_err(DataflowError::InternalError)?;
            tasks.push((name.clone(), *task_hash, task));
        }
        let graph = graph::build_graph(tasks)?;
        Ok((graph, state))
    }

    /// `dataflowGetGraph` (§6): the task-DAG for a workspace's deployed
    /// package, with dependency edges pre-derived from shared output paths.
    pub async fn dataflow_get_graph(
        &self,
        repo: &str,
        ws: &str,
    ) -> Result<GraphView, DataflowError> {
        let (graph, _state) = self.build_graph_for(repo, ws).await?;
        let tasks = graph
            .tasks
            .iter()
            .map(|t| GraphTaskView {
                name: t.name.clone(),
                hash: t.task_hash,
                inputs: t.inputs.clone(),
                output: t.output.clone(),
                depends_on: graph.depends_on[&t.name].iter().cloned().collect(),
            })
            .collect();
        Ok(GraphView { tasks })
    }

    /// `taskLogs` (§6): a page of one task's stdout/stderr from its most
    /// recently recorded execution against the workspace's current input
    /// hashes. Recomputes the same `inputsHash` cache key the scheduler
    /// used by resolving `task`'s inputs against the live workspace tree.
    pub async fn task_logs(
        &self,
        repo: &str,
        ws: &str,
        task: &str,
        stream: Stream,
        offset: u64,
        limit: Option<u64>,
    ) -> Result<LogWindow, DataflowError> {
        let (graph, state) = self.build_graph_for(repo, ws).await?;
        let node = graph
            .task(task)
            .ok_or_else(|| DataflowError::TaskNotFound(task.to_string()))?;

        let mut input_hashes = Vec::with_capacity(node.inputs.len());
        for input in &node.inputs {
            let outcome = tree::resolve_path(&self.object_store, repo, state.root_hash, input)
                .await
                .map_err(DataflowError::InternalError)?;
            match outcome {
                tree::ResolveOutcome::Value(hash) => input_hashes.push(hash),
                tree::ResolveOutcome::Null => {
                    let hash = self
                        .object_store
                        .write(repo, &value_codec::null_blob())
                        .await
                        .map_err(|e| DataflowError::InternalError(e.to_string()))?;
                    input_hashes.push(hash);
                }
                tree::ResolveOutcome::Unassigned | tree::ResolveOutcome::StructuralViolation => {
                    return Err(DataflowError::ExecutionNotFound(task.to_string()));
                }
            }
        }
        let inputs_hash = model::inputs_hash(&input_hashes);

        let status = self
            .ref_store
            .executions
            .get_latest(repo, &node.task_hash, &inputs_hash)
            .await
            .map_err(DataflowError::InternalError)?
            .ok_or_else(|| DataflowError::ExecutionNotFound(task.to_string()))?;

        self.log_store
            .read(
                repo,
                &node.task_hash,
                &inputs_hash,
                &status.execution_id().to_string(),
                stream,
                offset,
                limit,
            )
            .await
            .map_err(DataflowError::InternalError)
    }

    async fn acquire_lock(
        &self,
        repo: &str,
        ws: &str,
        options: &ExecuteOptions,
    ) -> Result<(Arc<LockHandle>, bool), DataflowError> {
        if let Some(handle) = &options.lock {
            return Ok((handle.clone(), false));
        }
        let holder = Holder::local(self.process_identity.as_ref(), "dataflow-engine");
        let handle = self
            .lock_service
            .acquire(repo, ws, "dataflow", holder, AcquireOptions::default())
            .await
            .map_err(DataflowError::InternalError)?;
        match handle {
            Some(handle) => Ok((Arc::new(handle), true)),
            None => Err(DataflowError::WorkspaceLocked(ws.to_string())),
        }
    }

    async fn release_lock_if_owned(&self, ws: &str, lock: &Arc<LockHandle>, owns_lock: bool) {
        if owns_lock {
            if let Err(e) = lock.release().await {
                log::warn!("failed to release dataflow lock for workspace {ws}: {e}");
            }
        }
    }

    /// Appends `event` to `run` and immediately persists the record, so a
    /// non-blocking client polling `dataflowExecution` observes events as
    /// they happen rather than only once the run completes (§4.6.4, §5).
    async fn record_event(&self, repo: &str, run: &mut DataflowRun, event: Event) {
        run.push_event(event);
        if let Err(e) = self.ref_store.runs.write(repo, run).await {
            log::warn!(
                "failed to persist event for dataflow run {}: {e}",
                run.run_id
            );
        }
    }

    /// `dataflowExecute` (§6): runs a workspace's task-DAG to completion (or
    /// cancellation) and returns the full outcome.
    pub async fn dataflow_execute(
        &self,
        repo: &str,
        ws: &str,
        options: ExecuteOptions,
    ) -> Result<DataflowExecuteResult, EngineError> {
        let (lock, owns_lock) = self.acquire_lock(repo, ws, &options).await?;
        let run = DataflowRun::new(ws, SystemTime::now());
        if let Err(e) = self.ref_store.runs.write(repo, &run).await {
            self.release_lock_if_owned(ws, &lock, owns_lock).await;
            return Err(DataflowError::InternalError(e).into());
        }

        let result = self.run_to_completion(repo, ws, options, run).await;
        self.release_lock_if_owned(ws, &lock, owns_lock).await;
        result
    }

    /// `dataflowStart` (§6): the non-blocking counterpart of
    /// `dataflowExecute`. Validates the workspace and (if set) the filter
    /// synchronously, then runs the schedule in the background and returns
    /// the new run's id immediately.
    pub async fn dataflow_start(
        &self,
        repo: &str,
        ws: &str,
        options: ExecuteOptions,
    ) -> Result<RunId, DataflowError> {
        let (lock, owns_lock) = self.acquire_lock(repo, ws, &options).await?;

        let (graph, _state) = match self.build_graph_for(repo, ws).await {
            Ok(ok) => ok,
            Err(e) => {
                self.release_lock_if_owned(ws, &lock, owns_lock).await;
                return Err(e);
            }
        };
        if let Some(filter) = &options.filter {
            if graph.task(filter).is_none() {
                self.release_lock_if_owned(ws, &lock, owns_lock).await;
                return Err(DataflowError::TaskNotFound(filter.clone()));
            }
        }

        let run = DataflowRun::new(ws, SystemTime::now());
        let run_id = run.run_id;
        if let Err(e) = self.ref_store.runs.write(repo, &run).await {
            self.release_lock_if_owned(ws, &lock, owns_lock).await;
            return Err(DataflowError::InternalError(e));
        }

        let engine = self.clone();
        let repo = repo.to_string();
        let ws = ws.to_string();
        tokio::spawn(async move {
            let result = engine.run_to_completion(&repo, &ws, options, run).await;
            engine.release_lock_if_owned(&ws, &lock, owns_lock).await;
            if let Err(e) = &result {
                log::warn!("background dataflow run for workspace {ws} ended with an error: {e}");
            }
        });
        Ok(run_id)
    }

    /// `dataflowExecution` (§6): the observable state of the latest run for
    /// a workspace, with its event log paginated by `offset`/`limit`.
    pub async fn dataflow_execution(
        &self,
        repo: &str,
        ws: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<DataflowExecutionState, DataflowError> {
        let run = self
            .ref_store
            .runs
            .get_latest(repo, ws)
            .await
            .map_err(DataflowError::InternalError)?
            .ok_or_else(|| DataflowError::NoActiveExecution(ws.to_string()))?;
        let total_events = run.total_events();
        let events = if offset >= total_events {
            Vec::new()
        } else {
            let end = limit.map_or(total_events, |l| (offset + l).min(total_events));
            run.events[offset..end].to_vec()
        };
        Ok(DataflowExecutionState {
            status: run.status,
            summary: run.summary,
            events,
            total_events,
        })
    }

    /// `dataflowCancel` (§6): fires the cancellation signal of the run
    /// currently in flight for a workspace, if any.
    pub async fn dataflow_cancel(&self, repo: &str, ws: &str) -> Result<(), DataflowError> {
        let key = (repo.to_string(), ws.to_string());
        let cancel = self.active_cancellations.lock().get(&key).cloned();
        match cancel {
            Some(cancel) => {
                cancel.cancel();
                Ok(())
            }
            None => Err(DataflowError::NoActiveExecution(ws.to_string())),
        }
    }

    async fn run_to_completion(
        &self,
        repo: &str,
        ws: &str,
        options: ExecuteOptions,
        mut run: DataflowRun,
    ) -> Result<DataflowExecuteResult, EngineError> {
        let (graph, state) = self.build_graph_for(repo, ws).await?;

        if let Some(filter) = &options.filter {
            if graph.task(filter).is_none() {
                return Err(DataflowError::TaskNotFound(filter.clone()).into());
            }
        }

        let (run_cancel, run_signal) = Cancellation::new();
        if let Some(caller_signal) = options.signal.clone() {
            forward_cancellation(caller_signal, run_cancel.clone());
        }
        let key = (repo.to_string(), ws.to_string());
        self.active_cancellations
            .lock()
            .insert(key.clone(), run_cancel);

        let outcome = self
            .schedule(repo, ws, state, &graph, &options, run_signal, &mut run)
            .await;

        self.active_cancellations.lock().remove(&key);

        let (status, summary, result) = match outcome {
            Ok((summary, tasks)) => (
                RunStatus::Completed,
                summary.clone(),
                Ok(DataflowExecuteResult {
                    run_id: run.run_id,
                    success: summary.success,
                    executed: summary.executed,
                    cached: summary.cached,
                    failed: summary.failed,
                    skipped: summary.skipped,
                    tasks,
                }),
            ),
            Err((summary, tasks)) => {
                run.push_event(Event::Aborted { task: None });
                (
                    RunStatus::Aborted,
                    summary.clone(),
                    Err(EngineError::Aborted { summary, tasks }),
                )
            }
        };
        run.status = status;
        run.summary = Some(summary);
        run.completed_at = Some(SystemTime::now());
        if let Err(e) = self.ref_store.runs.write(repo, &run).await {
            log::warn!(
                "failed to persist final state for dataflow run {}: {e}",
                run.run_id
            );
        }

        result
    }

    /// The scheduler loop proper: readiness -> input resolution -> dispatch,
    /// racing a cancellation signal against in-flight task completions via a
    /// `JoinSet` and a biased `tokio::select!`. Returns `Err` with whatever
    /// partial outcome was known at the moment of cancellation.
    #[allow(clippy::too_many_lines)]
    async fn schedule(
        &self,
        repo: &str,
        ws: &str,
        mut workspace_state: WorkspaceState,
        graph: &Graph,
        options: &ExecuteOptions,
        mut signal: CancellationSignal,
        run: &mut DataflowRun,
    ) -> Result<(RunSummary, Vec<TaskOutcome>), (RunSummary, Vec<TaskOutcome>)> {
        let concurrency = options.concurrency.unwrap_or(DEFAULT_CONCURRENCY).max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));

        let mut root_hash = workspace_state.root_hash;
        let mut completed: BTreeSet<String> = BTreeSet::new();
        let mut blocked: BTreeSet<String> = BTreeSet::new();
        let mut running: BTreeSet<String> = BTreeSet::new();
        let mut outcomes: BTreeMap<String, TaskOutcome> = graph
            .tasks
            .iter()
            .map(|t| (t.name.clone(), TaskOutcome::pending(t.name.clone())))
            .collect();
        let mut started_at: BTreeMap<String, SystemTime> = BTreeMap::new();

        let mut join_set: JoinSet<(String, Result<TaskResult, String>)> = JoinSet::new();
        let mut aborted = false;

        loop {
            if !aborted && *signal.borrow() {
                aborted = true;
            }

            if !aborted {
                loop {
                    let ready = graph::get_ready_tasks(
                        graph,
                        &completed,
                        &blocked,
                        &running,
                        options.filter.as_deref(),
                    );
                    let Some(name) = ready.into_iter().next() else {
                        break;
                    };
                    let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                        break;
                    };
                    let node = graph
                        .task(&name)
                        .expect("ready task name comes from this graph")
                        .clone();

                    let mut input_hashes = Vec::with_capacity(node.inputs.len());
                    let mut unavailable = false;
                    let mut errored = false;
                    for input in &node.inputs {
                        match tree::resolve_path(&self.object_store, repo, root_hash, input).await
                        {
                            Ok(tree::ResolveOutcome::Value(hash)) => input_hashes.push(hash),
                            Ok(tree::ResolveOutcome::Null) => {
                                match self
                                    .object_store
                                    .write(repo, &value_codec::null_blob())
                                    .await
                                {
                                    Ok(hash) => input_hashes.push(hash),
                                    Err(e) => {
                                        log::warn!(
                                            "failed to write null blob for task {name}: {e}"
                                        );
                                        errored = true;
                                        break;
                                    }
                                }
                            }
                            Ok(tree::ResolveOutcome::Unassigned) => {
                                unavailable = true;
                                break;
                            }
                            Ok(tree::ResolveOutcome::StructuralViolation) => {
                                errored = true;
                                break;
                            }
                            Err(e) => {
                                log::warn!("failed to resolve input {input} for task {name}: {e}");
                                errored = true;
                                break;
                            }
                        }
                    }

                    if unavailable {
                        self.record_event(
                            repo,
                            run,
                            Event::InputUnavailable {
                                task: name.clone(),
                                reason: "an input path is unassigned in the workspace tree"
                                    .to_string(),
                            },
                        )
                        .await;
                        self.mark_blocked_and_skip(
                            repo,
                            graph,
                            &name,
                            TaskState::Skipped,
                            None,
                            &completed,
                            &mut blocked,
                            &mut outcomes,
                            run,
                        )
                        .await;
                        continue;
                    }
                    if errored {
                        self.record_event(
                            repo,
                            run,
                            Event::Failed {
                                task: name.clone(),
                                exit_code: -1,
                            },
                        )
                        .await;
                        self.mark_blocked_and_skip(
                            repo,
                            graph,
                            &name,
                            TaskState::Error,
                            Some(-1),
                            &completed,
                            &mut blocked,
                            &mut outcomes,
                            run,
                        )
                        .await;
                        continue;
                    }

                    let inputs_hash = model::inputs_hash(&input_hashes);
                    let already_cached = !options.force
                        && self
                            .ref_store
                            .executions
                            .get_latest_output(repo, &node.task_hash, &inputs_hash)
                            .await
                            .unwrap_or(None)
                            .is_some();
                    if !already_cached {
                        self.record_event(
                            repo,
                            run,
                            Event::Start {
                                task: name.clone(),
                                started_at: SystemTime::now(),
                            },
                        )
                        .await;
                    }
                    started_at.insert(name.clone(), SystemTime::now());
                    running.insert(name.clone());

                    let runner = self.task_runner.clone();
                    let repo_owned = repo.to_string();
                    let task_hash = node.task_hash;
                    let task_signal = signal.clone();
                    let dispatch_name = name.clone();
                    join_set.spawn(async move {
                        let _permit = permit;
                        let result = runner
                            .execute(
                                &repo_owned,
                                &task_hash,
                                &input_hashes,
                                Some(task_signal),
                                RunnerOptions::default(),
                            )
                            .await;
                        (dispatch_name, result)
                    });
                }
            }

            if running.is_empty() && join_set.is_empty() {
                if aborted {
                    break;
                }
                let ready = graph::get_ready_tasks(
                    graph,
                    &completed,
                    &blocked,
                    &running,
                    options.filter.as_deref(),
                );
                if !ready.is_empty() {
                    log::warn!(
                        "dataflow scheduler stalled for workspace {ws} with ready tasks {ready:?} but no dispatch capacity"
                    );
                }
                break;
            }

            tokio::select! {
                biased;
                changed = signal.changed(), if !aborted => {
                    if changed.is_ok() && *signal.borrow() {
                        aborted = true;
                    }
                }
                next = join_set.join_next(), if !join_set.is_empty() => {
                    let Some(joined) = next else { continue };
                    let (name, result) = match joined {
                        Ok(pair) => pair,
                        Err(join_err) => {
                            log::warn!("dataflow task join error: {join_err}");
                            continue;
                        }
                    };
                    running.remove(&name);
                    let duration = started_at
                        .get(&name)
                        .and_then(|at| SystemTime::now().duration_since(*at).ok())
                        .unwrap_or_default();

                    match result {
                        Ok(TaskResult::Success { output_hash, cached, .. }) => {
                            if cached {
                                self.record_event(
                                    repo,
                                    run,
                                    Event::Cached { task: name.clone(), output_hash },
                                )
                                .await;
                            } else {
                                self.record_event(
                                    repo,
                                    run,
                                    Event::Complete {
                                        task: name.clone(),
                                        duration,
                                        output_hash,
                                    },
                                )
                                .await;
                            }
                            let output_path = graph
                                .task(&name)
                                .expect("completed task name comes from this graph")
                                .output
                                .clone();
                            match tree::write_path(
                                &self.object_store,
                                repo,
                                root_hash,
                                &output_path,
                                DataRef::Value(output_hash),
                            )
                            .await
                            {
                                Ok(new_root) => {
                                    root_hash = new_root;
                                    workspace_state =
                                        workspace_state.with_root(new_root, SystemTime::now());
                                    if let Err(e) =
                                        self.ref_store.workspaces.write(repo, ws, &workspace_state).await
                                    {
                                        log::warn!("failed to persist new workspace root: {e}");
                                    }
                                }
                                Err(e) => log::warn!("failed to write output for {name}: {e}"),
                            }
                            completed.insert(name.clone());
                            outcomes.insert(
                                name.clone(),
                                TaskOutcome {
                                    name,
                                    state: TaskState::Success,
                                    output_hash: Some(output_hash),
                                    exit_code: None,
                                    cached,
                                },
                            );
                        }
                        Ok(TaskResult::Failed { exit_code, .. }) => {
                            self.record_event(
                                repo,
                                run,
                                Event::Failed { task: name.clone(), exit_code },
                            )
                            .await;
                            self.mark_blocked_and_skip(
                                repo,
                                graph,
                                &name,
                                TaskState::Failed,
                                Some(exit_code),
                                &completed,
                                &mut blocked,
                                &mut outcomes,
                                run,
                            )
                            .await;
                        }
                        Ok(TaskResult::Error { message, .. }) | Err(message) => {
                            log::warn!("task {name} ended in error: {message}");
                            self.record_event(
                                repo,
                                run,
                                Event::Failed { task: name.clone(), exit_code: -1 },
                            )
                            .await;
                            self.mark_blocked_and_skip(
                                repo,
                                graph,
                                &name,
                                TaskState::Error,
                                Some(-1),
                                &completed,
                                &mut blocked,
                                &mut outcomes,
                                run,
                            )
                            .await;
                        }
                    }
                }
            }
        }

        let summary = RunSummary {
            executed: outcomes
                .values()
                .filter(|o| o.state == TaskState::Success && !o.cached)
                .count(),
            cached: outcomes
                .values()
                .filter(|o| o.state == TaskState::Success && o.cached)
                .count(),
            failed: outcomes
                .values()
                .filter(|o| o.state == TaskState::Failed || o.state == TaskState::Error)
                .count(),
            skipped: outcomes
                .values()
                .filter(|o| o.state == TaskState::Skipped)
                .count(),
            success: !aborted && outcomes.values().all(|o| o.state == TaskState::Success),
        };
        let tasks: Vec<TaskOutcome> = outcomes.into_values().collect();

        if aborted {
            Err((summary, tasks))
        } else {
            Ok((summary, tasks))
        }
    }

    /// Records `from_task`'s own terminal outcome and transitively skips
    /// every not-yet-resolved dependent, emitting one `InputUnavailable`
    /// event per skipped task (§4.6.2).
    #[allow(clippy::too_many_arguments)]
    async fn mark_blocked_and_skip(
        &self,
        repo: &str,
        graph: &Graph,
        from_task: &str,
        from_task_state: TaskState,
        from_task_exit_code: Option<i32>,
        completed: &BTreeSet<String>,
        blocked: &mut BTreeSet<String>,
        outcomes: &mut BTreeMap<String, TaskOutcome>,
        run: &mut DataflowRun,
    ) {
        blocked.insert(from_task.to_string());
        outcomes.insert(
            from_task.to_string(),
            TaskOutcome {
                name: from_task.to_string(),
                state: from_task_state,
                output_hash: None,
                exit_code: from_task_exit_code,
                cached: false,
            },
        );
        for dependent in graph::get_dependents_to_skip(graph, from_task, completed, blocked) {
            blocked.insert(dependent.clone());
            self.record_event(
                repo,
                run,
                Event::InputUnavailable {
                    task: dependent.clone(),
                    reason: format!("upstream task {from_task} did not complete"),
                },
            )
            .await;
            outcomes.insert(
                dependent.clone(),
                TaskOutcome {
                    name: dependent,
                    state: TaskState::Skipped,
                    output_hash: None,
                    exit_code: None,
                    cached: false,
                },
            );
        }
    }
}

/// Forwards a caller-supplied cancellation signal onto the run's own
/// `Cancellation`, so `dataflowCancel` and an externally-supplied
/// `ExecuteOptions::signal` both converge on the single watch channel the
/// scheduler loop actually watches.
fn forward_cancellation(mut caller_signal: CancellationSignal, target: Cancellation) {
    tokio::spawn(async move {
        loop {
            if caller_signal.changed().await.is_err() {
                break;
            }
            if *caller_signal.borrow() {
                target.cancel();
                break;
            }
        }
    });
}
