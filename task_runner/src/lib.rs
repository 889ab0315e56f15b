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

//! C5: executes a single task given its content-addressed inputs --
//! cache probe, scratch I/O, process-group spawn, output capture, status
//! persistence -- per the 12-step algorithm of §4.5.

mod children;

use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use children::ManagedChild;
use ir_eval::IrEvaluator;
use log_store::{LogStore, Stream};
use model::{inputs_hash, ExecutionId, ExecutionStatus, Hash, TaskObject};
use object_store::ObjectStore;
use process_identity::ProcessIdentity;
use ref_store::RefStore;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

const DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const TEE_CHUNK_SIZE: usize = 8192;

/// A one-shot cancellation signal, shared between the caller that wants to
/// abort an execution and the Task Runner that is watching for it. Modeled
/// as a `watch` channel rather than pulling in a dedicated cancellation-token
/// crate: the only event that ever matters is the single `false -> true`
/// transition.
#[derive(Clone)]
pub struct Cancellation(Arc<tokio::sync::watch::Sender<bool>>);

pub type CancellationSignal = tokio::sync::watch::Receiver<bool>;

impl Cancellation {
    pub fn new() -> (Cancellation, CancellationSignal) {
        let (tx, rx) = tokio::sync::watch::channel(false);
        (Cancellation(Arc::new(tx)), rx)
    }

    /// Idempotent: firing an already-fired cancellation is a no-op.
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

type StdoutCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Per-execution options recognised by `execute` (§4.5).
#[derive(Clone, Default)]
pub struct ExecuteOptions {
    pub force: bool,
    pub timeout: Option<Duration>,
    pub on_stdout: Option<StdoutCallback>,
    pub on_stderr: Option<StdoutCallback>,
}

/// The outcome of one `execute` call.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskResult {
    Success {
        execution_id: Option<ExecutionId>,
        output_hash: Hash,
        cached: bool,
    },
    Failed {
        execution_id: ExecutionId,
        exit_code: i32,
    },
    Error {
        execution_id: Option<ExecutionId>,
        message: String,
    },
}

#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn execute(
        &self,
        repo: &str,
        task_hash: &Hash,
        input_hashes: &[Hash],
        signal: Option<CancellationSignal>,
        options: ExecuteOptions,
    ) -> Result<TaskResult, String>;
}

static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

fn scratch_dir_name(task_hash: &Hash, inputs_hash: &Hash) -> String {
    let counter = SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!(
        "{}-{}-{}-{}-{}",
        &task_hash.to_hex()[..16],
        &inputs_hash.to_hex()[..16],
        std::process::id(),
        nanos,
        counter
    )
}

/// Spawns argvs as process groups, materialising content-addressed inputs
/// into a private scratch directory and persisting the recorded outcome.
pub struct ProcessTaskRunner {
    object_store: Arc<ObjectStore>,
    ref_store: Arc<RefStore>,
    log_store: Arc<LogStore>,
    ir_evaluator: Arc<dyn IrEvaluator>,
    process_identity: Arc<dyn ProcessIdentity>,
    scratch_root: PathBuf,
    graceful_shutdown_timeout: Duration,
}

impl ProcessTaskRunner {
    pub fn new(
        object_store: Arc<ObjectStore>,
        ref_store: Arc<RefStore>,
        log_store: Arc<LogStore>,
        ir_evaluator: Arc<dyn IrEvaluator>,
        process_identity: Arc<dyn ProcessIdentity>,
        scratch_root: impl Into<PathBuf>,
    ) -> ProcessTaskRunner {
        ProcessTaskRunner {
            object_store,
            ref_store,
            log_store,
            ir_evaluator,
            process_identity,
            scratch_root: scratch_root.into(),
            graceful_shutdown_timeout: DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT,
        }
    }

    pub fn with_graceful_shutdown_timeout(mut self, timeout: Duration) -> ProcessTaskRunner {
        self.graceful_shutdown_timeout = timeout;
        self
    }

    async fn write_status(
        &self,
        repo: &str,
        task_hash: &Hash,
        inputs_hash: &Hash,
        status: &ExecutionStatus,
    ) -> Result<(), String> {
        self.ref_store
            .executions
            .write(repo, task_hash, inputs_hash, status)
            .await
    }

    async fn fail_with_error(
        &self,
        repo: &str,
        task_hash: &Hash,
        inputs_hash: &Hash,
        execution_id: ExecutionId,
        input_hashes: Vec<Hash>,
        started_at: SystemTime,
        message: String,
    ) -> Result<TaskResult, String> {
        let status = ExecutionStatus::Error {
            execution_id,
            input_hashes,
            started_at,
            completed_at: SystemTime::now(),
            message: message.clone(),
        };
        self.write_status(repo, task_hash, inputs_hash, &status).await?;
        Ok(TaskResult::Error {
            execution_id: Some(execution_id),
            message,
        })
    }

    async fn tee(
        mut reader: impl tokio::io::AsyncRead + Unpin,
        log_store: Arc<LogStore>,
        repo: String,
        task_hash: Hash,
        inputs_hash: Hash,
        execution_id: String,
        stream: Stream,
        callback: Option<StdoutCallback>,
    ) {
        let mut buf = vec![0u8; TEE_CHUNK_SIZE];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    log::warn!("error reading {stream} for execution {execution_id}: {e}");
                    break;
                }
            };
            let chunk = &buf[..n];
            if let Some(callback) = &callback {
                callback(chunk);
            }
            if let Err(e) = log_store
                .append(&repo, &task_hash, &inputs_hash, &execution_id, stream, chunk)
                .await
            {
                log::warn!("failed to append {stream} for execution {execution_id}: {e}");
            }
        }
    }

    async fn run_to_completion(
        mut child: ManagedChild,
        mut signal: Option<CancellationSignal>,
        timeout: Option<Duration>,
    ) -> Result<std::process::ExitStatus, String> {
        const POLL_INTERVAL: Duration = Duration::from_millis(20);
        let deadline = timeout.map(|d| tokio::time::Instant::now() + d);
        loop {
            if let Some(status) = child
                .try_wait()
                .map_err(|e| format!("failed to poll process: {e}"))?
            {
                return Ok(status);
            }
            let cancelled = signal
                .as_mut()
                .map(|s| *s.borrow_and_update())
                .unwrap_or(false);
            let timed_out = deadline.is_some_and(|d| tokio::time::Instant::now() >= d);
            if cancelled || timed_out {
                return child.graceful_shutdown().await;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl TaskRunner for ProcessTaskRunner {
    async fn execute(
        &self,
        repo: &str,
        task_hash: &Hash,
        input_hashes: &[Hash],
        signal: Option<CancellationSignal>,
        options: ExecuteOptions,
    ) -> Result<TaskResult, String> {
        let cache_key = inputs_hash(input_hashes);

        if !options.force {
            if let Some(output_hash) = self
                .ref_store
                .executions
                .get_latest_output(repo, task_hash, &cache_key)
                .await?
            {
                return Ok(TaskResult::Success {
                    execution_id: None,
                    output_hash,
                    cached: true,
                });
            }
        }

        let execution_id = ExecutionId::new();
        let started_at = SystemTime::now();
        let input_hashes_vec = input_hashes.to_vec();

        let task_bytes = match self.object_store.read(repo, task_hash).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return self
                    .fail_with_error(
                        repo,
                        task_hash,
                        &cache_key,
                        execution_id,
                        input_hashes_vec,
                        started_at,
                        format!("failed to load task object: {e}"),
                    )
                    .await;
            }
        };
        let task = match TaskObject::decode(&task_bytes) {
            Ok(task) => task,
            Err(e) => {
                return self
                    .fail_with_error(
                        repo,
                        task_hash,
                        &cache_key,
                        execution_id,
                        input_hashes_vec,
                        started_at,
                        e,
                    )
                    .await;
            }
        };

        let scratch_dir = self
            .scratch_root
            .join(scratch_dir_name(task_hash, &cache_key));
        if let Err(e) = tokio::fs::create_dir_all(&scratch_dir).await {
            return self
                .fail_with_error(
                    repo,
                    task_hash,
                    &cache_key,
                    execution_id,
                    input_hashes_vec,
                    started_at,
                    format!("failed to allocate scratch directory: {e}"),
                )
                .await;
        }

        let result = self
            .execute_in_scratch(
                repo,
                task_hash,
                &cache_key,
                &task,
                &input_hashes_vec,
                execution_id,
                started_at,
                &scratch_dir,
                signal,
                options,
            )
            .await;

        if let Err(e) = tokio::fs::remove_dir_all(&scratch_dir).await {
            log::warn!("failed to remove scratch directory {}: {e}", scratch_dir.display());
        }

        result
    }
}

impl ProcessTaskRunner {
    #[allow(clippy::too_many_arguments)]
    async fn execute_in_scratch(
        &self,
        repo: &str,
        task_hash: &Hash,
        cache_key: &Hash,
        task: &TaskObject,
        input_hashes: &[Hash],
        execution_id: ExecutionId,
        started_at: SystemTime,
        scratch_dir: &std::path::Path,
        signal: Option<CancellationSignal>,
        options: ExecuteOptions,
    ) -> Result<TaskResult, String> {
        let mut input_paths = Vec::with_capacity(input_hashes.len());
        for (i, hash) in input_hashes.iter().enumerate() {
            let bytes = match self.object_store.read(repo, hash).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    return self
                        .fail_with_error(
                            repo,
                            task_hash,
                            cache_key,
                            execution_id,
                            input_hashes.to_vec(),
                            started_at,
                            format!("failed to materialise input {i}: {e}"),
                        )
                        .await;
                }
            };
            let path = scratch_dir.join(format!("input-{i}"));
            if let Err(e) = tokio::fs::write(&path, &bytes).await {
                return self
                    .fail_with_error(
                        repo,
                        task_hash,
                        cache_key,
                        execution_id,
                        input_hashes.to_vec(),
                        started_at,
                        format!("failed to write input {i} to scratch: {e}"),
                    )
                    .await;
            }
            input_paths.push(path);
        }
        let output_path = scratch_dir.join("output");

        let argv = match self
            .ir_evaluator
            .evaluate(&task.command_ir, &input_paths, &output_path)
            .await
        {
            Ok(argv) => argv,
            Err(e) => {
                return self
                    .fail_with_error(
                        repo,
                        task_hash,
                        cache_key,
                        execution_id,
                        input_hashes.to_vec(),
                        started_at,
                        e.to_string(),
                    )
                    .await;
            }
        };
        if argv.is_empty() {
            return self
                .fail_with_error(
                    repo,
                    task_hash,
                    cache_key,
                    execution_id,
                    input_hashes.to_vec(),
                    started_at,
                    "commandIr evaluated to an empty argv".to_string(),
                )
                .await;
        }

        let running = ExecutionStatus::Running {
            execution_id,
            input_hashes: input_hashes.to_vec(),
            started_at,
            pid: self.process_identity.current_pid(),
            pid_start_time: self
                .process_identity
                .start_time(self.process_identity.current_pid())
                .unwrap_or(0),
            boot_id: self.process_identity.boot_id(),
        };
        self.write_status(repo, task_hash, cache_key, &running).await?;

        let mut command = Command::new(&argv[0]);
        command.args(&argv[1..]);
        command.stdin(std::process::Stdio::null());
        command.stdout(std::process::Stdio::piped());
        command.stderr(std::process::Stdio::piped());

        let mut child = match ManagedChild::spawn(command, self.graceful_shutdown_timeout) {
            Ok(child) => child,
            Err(e) => {
                return self
                    .fail_with_error(
                        repo,
                        task_hash,
                        cache_key,
                        execution_id,
                        input_hashes.to_vec(),
                        started_at,
                        format!("failed to spawn process: {e}"),
                    )
                    .await;
            }
        };

        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");
        let execution_id_str = execution_id.to_string();

        let stdout_tee = tokio::spawn(Self::tee(
            stdout,
            self.log_store.clone(),
            repo.to_string(),
            *task_hash,
            *cache_key,
            execution_id_str.clone(),
            Stream::Stdout,
            options.on_stdout.clone(),
        ));
        let stderr_tee = tokio::spawn(Self::tee(
            stderr,
            self.log_store.clone(),
            repo.to_string(),
            *task_hash,
            *cache_key,
            execution_id_str.clone(),
            Stream::Stderr,
            options.on_stderr.clone(),
        ));

        let exit_status = Self::run_to_completion(child, signal, options.timeout).await?;
        let _ = stdout_tee.await;
        let _ = stderr_tee.await;

        let completed_at = SystemTime::now();
        if exit_status.success() {
            let output_bytes = match tokio::fs::read(&output_path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    let status = ExecutionStatus::Error {
                        execution_id,
                        input_hashes: input_hashes.to_vec(),
                        started_at,
                        completed_at,
                        message: format!("output unreadable: {e}"),
                    };
                    self.write_status(repo, task_hash, cache_key, &status).await?;
                    return Ok(TaskResult::Error {
                        execution_id: Some(execution_id),
                        message: format!("output unreadable: {e}"),
                    });
                }
            };
            let output_hash = self
                .object_store
                .write(repo, &output_bytes)
                .await
                .map_err(|e| format!("failed to write output blob: {e}"))?;
            let status = ExecutionStatus::Success {
                execution_id,
                input_hashes: input_hashes.to_vec(),
                output_hash,
                started_at,
                completed_at,
            };
            self.write_status(repo, task_hash, cache_key, &status).await?;
            Ok(TaskResult::Success {
                execution_id: Some(execution_id),
                output_hash,
                cached: false,
            })
        } else {
            let exit_code = exit_status
                .code()
                .unwrap_or_else(|| -exit_status.signal().unwrap_or(0));
            let status = ExecutionStatus::Failed {
                execution_id,
                input_hashes: input_hashes.to_vec(),
                started_at,
                completed_at,
                exit_code,
            };
            self.write_status(repo, task_hash, cache_key, &status).await?;
            Ok(TaskResult::Failed {
                execution_id,
                exit_code,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use ir_eval::{CommandTemplate, TemplateIrEvaluator};
    use process_identity::FakeProcessIdentity;
    use ref_store::RefStore;

    use super::*;

    async fn runner() -> (
        ProcessTaskRunner,
        Arc<ObjectStore>,
        Arc<RefStore>,
        tempfile::TempDir,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let object_store = Arc::new(ObjectStore::new(dir.path().join("objects")));
        let ref_store = Arc::new(RefStore::new(dir.path().join("refs")));
        let log_store = Arc::new(LogStore::new(dir.path().join("logs")));
        let ir_evaluator = Arc::new(TemplateIrEvaluator::new(object_store.clone(), "repo"));
        let identity = Arc::new(FakeProcessIdentity::new(std::process::id(), "boot-a"));
        identity.mark_alive(std::process::id(), 1);
        let scratch_root = dir.path().join("scratch");
        let runner = ProcessTaskRunner::new(
            object_store.clone(),
            ref_store.clone(),
            log_store,
            ir_evaluator,
            identity,
            scratch_root,
        );
        (runner, object_store, ref_store, dir)
    }

    async fn write_task(
        object_store: &ObjectStore,
        argv: Vec<&str>,
        inputs: usize,
    ) -> Hash {
        let ir_hash = object_store
            .write("repo", &CommandTemplate::new(argv).encode())
            .await
            .unwrap();
        let task = TaskObject {
            command_ir: ir_hash,
            inputs: (0..inputs).map(|_| model::TreePath::field("x")).collect(),
            output: model::TreePath::field("out"),
        };
        object_store.write("repo", &task.encode()).await.unwrap()
    }

    #[tokio::test]
    async fn successful_task_writes_output_and_status() {
        let (runner, object_store, ref_store, _dir) = runner().await;
        let input_hash = object_store.write("repo", b"payload").await.unwrap();
        let task_hash = write_task(&object_store, vec!["cp", "{input:0}", "{output}"], 1).await;

        let result = runner
            .execute("repo", &task_hash, &[input_hash], None, ExecuteOptions::default())
            .await
            .unwrap();
        let TaskResult::Success {
            execution_id,
            output_hash,
            cached,
        } = result
        else {
            panic!("expected success");
        };
        assert!(execution_id.is_some());
        assert!(!cached);
        assert_eq!(object_store.read("repo", &output_hash).await.unwrap(), b"payload");

        let cache_key = inputs_hash(&[input_hash]);
        let latest = ref_store
            .executions
            .get_latest("repo", &task_hash, &cache_key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.output_hash(), Some(output_hash));
    }

    #[tokio::test]
    async fn cache_hit_skips_execution() {
        let (runner, object_store, _ref_store, _dir) = runner().await;
        let input_hash = object_store.write("repo", b"payload").await.unwrap();
        let task_hash = write_task(&object_store, vec!["cp", "{input:0}", "{output}"], 1).await;

        let first = runner
            .execute("repo", &task_hash, &[input_hash], None, ExecuteOptions::default())
            .await
            .unwrap();
        let TaskResult::Success { output_hash, .. } = first else {
            panic!("expected success");
        };

        let second = runner
            .execute("repo", &task_hash, &[input_hash], None, ExecuteOptions::default())
            .await
            .unwrap();
        match second {
            TaskResult::Success {
                cached,
                output_hash: second_hash,
                execution_id,
            } => {
                assert!(cached);
                assert_eq!(second_hash, output_hash);
                assert!(execution_id.is_none());
            }
            other => panic!("expected cached success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failing_task_records_failed_status() {
        let (runner, object_store, _ref_store, _dir) = runner().await;
        let task_hash = write_task(&object_store, vec!["bash", "-c", "exit 3"], 0).await;

        let result = runner
            .execute("repo", &task_hash, &[], None, ExecuteOptions::default())
            .await
            .unwrap();
        match result {
            TaskResult::Failed { exit_code, .. } => assert_eq!(exit_code, 3),
            other => panic!("expected failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_task_object_records_error() {
        let (runner, _object_store, _ref_store, _dir) = runner().await;
        let missing_hash = Hash::of_bytes(b"not a real task");
        let result = runner
            .execute("repo", &missing_hash, &[], None, ExecuteOptions::default())
            .await
            .unwrap();
        assert!(matches!(result, TaskResult::Error { .. }));
    }

    #[tokio::test]
    async fn cancellation_kills_the_process_group() {
        let (runner, object_store, _ref_store, _dir) = runner().await;
        let task_hash = write_task(&object_store, vec!["bash", "-c", "sleep 30"], 0).await;
        let (cancellation, signal) = Cancellation::new();

        let execute = tokio::spawn(async move {
            runner
                .execute("repo", &task_hash, &[], Some(signal), ExecuteOptions::default())
                .await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancellation.cancel();

        let result = tokio::time::timeout(Duration::from_secs(10), execute)
            .await
            .expect("execute should finish once cancelled")
            .unwrap()
            .unwrap();
        match result {
            TaskResult::Failed { exit_code, .. } => assert_ne!(exit_code, 0),
            other => panic!("expected failed after cancellation, got {other:?}"),
        }
    }
}
