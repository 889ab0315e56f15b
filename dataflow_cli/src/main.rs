// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! A thin binary exposing the Operations surface of §6 over a CLI: the
//! repo's edge, analogous to the teacher's `process_executor`/`client`
//! binaries. Builds one `dataflow_engine::DataflowEngine` per invocation
//! from `clap`-parsed arguments plus `DATAFLOW_REPO_ROOT`/
//! `DATAFLOW_CONCURRENCY` environment fallbacks and exits non-zero on any
//! `DataflowError`/`EngineError`, printing its `Display` to stderr.

use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use dataflow_engine::{DataflowEngine, ExecuteOptions};
use ir_eval::TemplateIrEvaluator;
use lock_service::{LockService, StandardLivenessProbe};
use log_store::{LogStore, Stream as LogStream};
use object_store::ObjectStore;
use process_identity::SystemProcessIdentity;
use ref_store::RefStore;
use task_runner::ProcessTaskRunner;

#[derive(Parser)]
#[command(name = "dataflow", about = "Drive the dataflow execution engine")]
struct Cli {
    /// Root directory the object/ref/lock/log stores are rooted at.
    /// Falls back to `DATAFLOW_REPO_ROOT`, then `./dataflow-repo`.
    #[arg(long, global = true)]
    repo_root: Option<PathBuf>,

    /// The repo namespace within `repo_root` to operate against.
    #[arg(long, global = true, default_value = "default")]
    repo: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// `dataflowGetGraph`: print a workspace's task DAG.
    Graph { workspace: String },
    /// `dataflowExecute`: run a workspace's tasks to completion and block.
    Execute {
        workspace: String,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        filter: Option<String>,
        /// Falls back to `DATAFLOW_CONCURRENCY`, then the engine default.
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// `dataflowStart`: kick off a run in the background and return its id.
    Start {
        workspace: String,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        filter: Option<String>,
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// `dataflowExecution`: the latest run's status and a page of events.
    Status {
        workspace: String,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// `dataflowCancel`: signal the run currently in flight, if any.
    Cancel { workspace: String },
    /// `taskLogs`: a page of one task's stdout/stderr from its most recent
    /// execution against the workspace's current input hashes.
    Logs {
        workspace: String,
        task: String,
        #[arg(long, value_enum, default_value = "stdout")]
        stream: CliStream,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        #[arg(long)]
        limit: Option<u64>,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum CliStream {
    Stdout,
    Stderr,
}

impl From<CliStream> for LogStream {
    fn from(s: CliStream) -> LogStream {
        match s {
            CliStream::Stdout => LogStream::Stdout,
            CliStream::Stderr => LogStream::Stderr,
        }
    }
}

struct Context {
    repo: String,
    engine: DataflowEngine,
}

fn repo_root(cli_value: Option<PathBuf>) -> PathBuf {
    cli_value
        .or_else(|| std::env::var("DATAFLOW_REPO_ROOT").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("./dataflow-repo"))
}

fn env_concurrency() -> Option<usize> {
    std::env::var("DATAFLOW_CONCURRENCY")
        .ok()
        .and_then(|v| v.parse().ok())
}

impl Context {
    fn new(repo_root: PathBuf, repo: String) -> Context {
        let object_store = Arc::new(ObjectStore::new(repo_root.join("objects")));
        let ref_store = Arc::new(RefStore::new(repo_root.join("refs")));
        let process_identity = Arc::new(SystemProcessIdentity::new());
        let probe = Arc::new(StandardLivenessProbe::new(process_identity.clone()));
        let lock_service = Arc::new(LockService::new(repo_root.join("locks"), probe));
        let log_store = Arc::new(LogStore::new(repo_root.join("logs")));
        let ir_evaluator = Arc::new(TemplateIrEvaluator::new(object_store.clone(), repo.clone()));
        let task_runner = Arc::new(ProcessTaskRunner::new(
            object_store.clone(),
            ref_store.clone(),
            log_store.clone(),
            ir_evaluator,
            process_identity.clone(),
            repo_root.join("scratch"),
        ));
        let engine = DataflowEngine::new(
            object_store.clone(),
            ref_store.clone(),
            lock_service,
            log_store.clone(),
            task_runner,
            process_identity,
        );
        Context { repo, engine }
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let ctx = Context::new(repo_root(cli.repo_root), cli.repo);

    let result = run(&ctx, cli.command).await;
    if let Err(message) = result {
        eprintln!("{message}");
        exit(1);
    }
}

async fn run(ctx: &Context, command: Command) -> Result<(), String> {
    match command {
        Command::Graph { workspace } => {
            let graph = ctx
                .engine
                .dataflow_get_graph(&ctx.repo, &workspace)
                .await
                .map_err(|e| e.to_string())?;
            for task in graph.tasks {
                println!(
                    "{}  output={}  inputs=[{}]  dependsOn=[{}]",
                    task.name,
                    task.output,
                    task.inputs
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", "),
                    task.depends_on.join(", ")
                );
            }
            Ok(())
        }
        Command::Execute {
            workspace,
            force,
            filter,
            concurrency,
        } => {
            let options = ExecuteOptions {
                force,
                filter,
                concurrency: concurrency.or_else(env_concurrency),
                signal: None,
                lock: None,
            };
            let result = ctx
                .engine
                .dataflow_execute(&ctx.repo, &workspace, options)
                .await
                .map_err(|e| e.to_string())?;
            println!(
                "success={} executed={} cached={} failed={} skipped={}",
                result.success, result.executed, result.cached, result.failed, result.skipped
            );
            if !result.success {
                return Err(format!(
                    "dataflow run {} did not succeed for workspace {workspace}",
                    result.run_id
                ));
            }
            Ok(())
        }
        Command::Start {
            workspace,
            force,
            filter,
            concurrency,
        } => {
            let options = ExecuteOptions {
                force,
                filter,
                concurrency: concurrency.or_else(env_concurrency),
                signal: None,
                lock: None,
            };
            let run_id = ctx
                .engine
                .dataflow_start(&ctx.repo, &workspace, options)
                .await
                .map_err(|e| e.to_string())?;
            println!("{run_id}");
            Ok(())
        }
        Command::Status {
            workspace,
            offset,
            limit,
        } => {
            let state = ctx
                .engine
                .dataflow_execution(&ctx.repo, &workspace, offset, limit)
                .await
                .map_err(|e| e.to_string())?;
            println!("status={:?} totalEvents={}", state.status, state.total_events);
            for event in state.events {
                println!("{event:?}");
            }
            Ok(())
        }
        Command::Cancel { workspace } => ctx
            .engine
            .dataflow_cancel(&ctx.repo, &workspace)
            .await
            .map_err(|e| e.to_string()),
        Command::Logs {
            workspace,
            task,
            stream,
            offset,
            limit,
        } => {
            let window = ctx
                .engine
                .task_logs(&ctx.repo, &workspace, &task, stream.into(), offset, limit)
                .await
                .map_err(|e| e.to_string())?;
            use std::io::Write;
            std::io::stdout()
                .write_all(&window.data)
                .map_err(|e| e.to_string())?;
            eprintln!(
                "\n[{} bytes of {}, complete={}]",
                window.size, window.total_size, window.complete
            );
            Ok(())
        }
    }
}
