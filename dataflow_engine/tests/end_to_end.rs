// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Drives `DataflowEngine` against real `bash -c` subprocesses through
//! `testutil::TestRepo`, exercising the six end-to-end scenarios.

use std::sync::Arc;
use std::time::Duration;

use dataflow_engine::{DataflowEngine, EngineError, ExecuteOptions, TaskState};
use log_store::Stream;
use model::{DataflowError, RunStatus, TreePath};
use process_identity::ProcessIdentity;
use testutil::TestRepo;

fn engine(repo: &TestRepo) -> DataflowEngine {
    DataflowEngine::new(
        repo.object_store.clone(),
        repo.ref_store.clone(),
        repo.lock_service.clone(),
        repo.log_store.clone(),
        repo.task_runner(),
        repo.process_identity.clone() as Arc<dyn ProcessIdentity>,
    )
}

#[tokio::test]
async fn simple_execute_runs_one_task_to_completion() {
    let repo = TestRepo::new();
    let (name, hash) = repo
        .write_task(
            "hello",
            &["bash", "-c", "printf hi > {output}"],
            &[],
            &TreePath::field("hello_out"),
        )
        .await;
    repo.deploy_package(
        "ws",
        "demo",
        "1.0.0",
        vec![(name, hash, vec![], TreePath::field("hello_out"))],
    )
    .await;

    let engine = engine(&repo);
    let result = engine
        .dataflow_execute(testutil::REPO, "ws", ExecuteOptions::default())
        .await
        .expect("run should succeed");

    assert!(result.success);
    assert_eq!(result.executed, 1);
    assert_eq!(result.failed, 0);
    assert_eq!(result.skipped, 0);
    assert_eq!(result.tasks[0].state, TaskState::Success);
}

#[tokio::test]
async fn diamond_graph_runs_all_four_tasks_in_dependency_order() {
    let repo = TestRepo::new();
    let (a_name, a_hash) = repo
        .write_task(
            "a",
            &["bash", "-c", "printf a > {output}"],
            &[],
            &TreePath::field("a_out"),
        )
        .await;
    let (b_name, b_hash) = repo
        .write_task(
            "b",
            &["bash", "-c", "cat {input:0} > {output}"],
            &[TreePath::field("a_out")],
            &TreePath::field("b_out"),
        )
        .await;
    let (c_name, c_hash) = repo
        .write_task(
            "c",
            &["bash", "-c", "cat {input:0} > {output}"],
            &[TreePath::field("a_out")],
            &TreePath::field("c_out"),
        )
        .await;
    let (d_name, d_hash) = repo
        .write_task(
            "d",
            &["bash", "-c", "cat {input:0} {input:1} > {output}"],
            &[TreePath::field("b_out"), TreePath::field("c_out")],
            &TreePath::field("d_out"),
        )
        .await;

    repo.deploy_package(
        "ws",
        "demo",
        "1.0.0",
        vec![
            (a_name, a_hash, vec![], TreePath::field("a_out")),
            (b_name, b_hash, vec![TreePath::field("a_out")], TreePath::field("b_out")),
            (c_name, c_hash, vec![TreePath::field("a_out")], TreePath::field("c_out")),
            (
                d_name,
                d_hash,
                vec![TreePath::field("b_out"), TreePath::field("c_out")],
                TreePath::field("d_out"),
            ),
        ],
    )
    .await;

    let engine = engine(&repo);
    let graph = engine
        .dataflow_get_graph(testutil::REPO, "ws")
        .await
        .expect("graph should build");
    let d = graph.tasks.iter().find(|t| t.name == "d").unwrap();
    assert_eq!(d.depends_on.len(), 2);
    assert!(d.depends_on.contains(&"b".to_string()));
    assert!(d.depends_on.contains(&"c".to_string()));

    let result = engine
        .dataflow_execute(testutil::REPO, "ws", ExecuteOptions::default())
        .await
        .expect("run should succeed");

    assert!(result.success);
    assert_eq!(result.executed, 4);
    assert_eq!(result.skipped, 0);
}

#[tokio::test]
async fn failing_task_fails_the_run() {
    let repo = TestRepo::new();
    let (name, hash) = repo
        .write_task(
            "boom",
            &["bash", "-c", "echo failing 1>&2; exit 7"],
            &[],
            &TreePath::field("boom_out"),
        )
        .await;
    repo.deploy_package(
        "ws",
        "demo",
        "1.0.0",
        vec![(name, hash, vec![], TreePath::field("boom_out"))],
    )
    .await;

    let engine = engine(&repo);
    let result = engine
        .dataflow_execute(testutil::REPO, "ws", ExecuteOptions::default())
        .await
        .expect("the engine call itself should not error, just report failure");

    assert!(!result.success);
    assert_eq!(result.failed, 1);
    assert_eq!(result.tasks[0].state, TaskState::Failed);
    assert_eq!(result.tasks[0].exit_code, Some(7));
}

#[tokio::test]
async fn task_logs_for_a_failing_task_returns_its_stderr() {
    let repo = TestRepo::new();
    let (name, hash) = repo
        .write_task(
            "boom",
            &["bash", "-c", "echo failing 1>&2; exit 7"],
            &[],
            &TreePath::field("boom_out"),
        )
        .await;
    repo.deploy_package(
        "ws",
        "demo",
        "1.0.0",
        vec![(name, hash, vec![], TreePath::field("boom_out"))],
    )
    .await;

    let engine = engine(&repo);
    let result = engine
        .dataflow_execute(testutil::REPO, "ws", ExecuteOptions::default())
        .await
        .expect("the engine call itself should not error, just report failure");
    assert!(!result.success);

    let window = engine
        .task_logs(testutil::REPO, "ws", "boom", Stream::Stderr, 0, None)
        .await
        .expect("a failed task should still have recorded stderr");
    assert!(window.total_size > 0);
    assert_eq!(window.data, b"failing\n");
}

#[tokio::test]
async fn diamond_with_upstream_failure_skips_downstream_tasks() {
    let repo = TestRepo::new();
    let (a_name, a_hash) = repo
        .write_task("a", &["bash", "-c", "exit 1"], &[], &TreePath::field("a_out"))
        .await;
    let (b_name, b_hash) = repo
        .write_task(
            "b",
            &["bash", "-c", "cat {input:0} > {output}"],
            &[TreePath::field("a_out")],
            &TreePath::field("b_out"),
        )
        .await;
    let (c_name, c_hash) = repo
        .write_task(
            "c",
            &["bash", "-c", "cat {input:0} > {output}"],
            &[TreePath::field("a_out")],
            &TreePath::field("c_out"),
        )
        .await;

    repo.deploy_package(
        "ws",
        "demo",
        "1.0.0",
        vec![
            (a_name, a_hash, vec![], TreePath::field("a_out")),
            (b_name, b_hash, vec![TreePath::field("a_out")], TreePath::field("b_out")),
            (c_name, c_hash, vec![TreePath::field("a_out")], TreePath::field("c_out")),
        ],
    )
    .await;

    let engine = engine(&repo);
    let result = engine
        .dataflow_execute(testutil::REPO, "ws", ExecuteOptions::default())
        .await
        .expect("the engine call itself should not error");

    assert!(!result.success);
    assert_eq!(result.failed, 1);
    assert_eq!(result.skipped, 2);
    let b = result.tasks.iter().find(|t| t.name == "b").unwrap();
    let c = result.tasks.iter().find(|t| t.name == "c").unwrap();
    assert_eq!(b.state, TaskState::Skipped);
    assert_eq!(c.state, TaskState::Skipped);

    let err = engine
        .task_logs(testutil::REPO, "ws", "b", Stream::Stdout, 0, None)
        .await
        .expect_err("a skipped task was never executed and has no recorded logs");
    assert!(matches!(err, DataflowError::ExecutionNotFound(task) if task == "b"));
}

#[tokio::test]
async fn second_run_with_unchanged_inputs_hits_the_cache() {
    let repo = TestRepo::new();
    let (name, hash) = repo
        .write_task(
            "hello",
            &["bash", "-c", "printf hi > {output}"],
            &[],
            &TreePath::field("hello_out"),
        )
        .await;
    repo.deploy_package(
        "ws",
        "demo",
        "1.0.0",
        vec![(name, hash, vec![], TreePath::field("hello_out"))],
    )
    .await;

    let engine = engine(&repo);
    let first = engine
        .dataflow_execute(testutil::REPO, "ws", ExecuteOptions::default())
        .await
        .expect("first run should succeed");
    assert_eq!(first.executed, 1);
    assert_eq!(first.cached, 0);

    let second = engine
        .dataflow_execute(testutil::REPO, "ws", ExecuteOptions::default())
        .await
        .expect("second run should succeed");
    assert_eq!(second.executed, 0);
    assert_eq!(second.cached, 1);
    assert!(second.tasks[0].cached);

    let forced = engine
        .dataflow_execute(
            testutil::REPO,
            "ws",
            ExecuteOptions {
                force: true,
                ..ExecuteOptions::default()
            },
        )
        .await
        .expect("forced run should succeed");
    assert_eq!(forced.executed, 1);
    assert_eq!(forced.cached, 0);
}

#[tokio::test]
async fn cancel_aborts_a_run_in_flight() {
    let repo = TestRepo::new();
    let (name, hash) = repo
        .write_task(
            "slow",
            &["bash", "-c", "sleep 5; printf done > {output}"],
            &[],
            &TreePath::field("slow_out"),
        )
        .await;
    repo.deploy_package(
        "ws",
        "demo",
        "1.0.0",
        vec![(name, hash, vec![], TreePath::field("slow_out"))],
    )
    .await;

    let engine = engine(&repo);
    let _run_id = engine
        .dataflow_start(testutil::REPO, "ws", ExecuteOptions::default())
        .await
        .expect("start should accept the run");

    tokio::time::sleep(Duration::from_millis(100)).await;
    engine
        .dataflow_cancel(testutil::REPO, "ws")
        .await
        .expect("a run should be in flight to cancel");

    let mut state = None;
    for _ in 0..50 {
        let current = engine
            .dataflow_execution(testutil::REPO, "ws", 0, None)
            .await
            .expect("execution state should be observable");
        if current.status != RunStatus::Running {
            state = Some(current);
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let state = state.expect("run should have reached a terminal status before the poll budget ran out");
    assert_eq!(state.status, RunStatus::Aborted);
}

#[tokio::test]
async fn filter_on_unknown_task_fails_fast() {
    let repo = TestRepo::new();
    let (name, hash) = repo
        .write_task(
            "hello",
            &["bash", "-c", "printf hi > {output}"],
            &[],
            &TreePath::field("hello_out"),
        )
        .await;
    repo.deploy_package(
        "ws",
        "demo",
        "1.0.0",
        vec![(name, hash, vec![], TreePath::field("hello_out"))],
    )
    .await;

    let engine = engine(&repo);
    let err = engine
        .dataflow_execute(
            testutil::REPO,
            "ws",
            ExecuteOptions {
                filter: Some("nonexistent".to_string()),
                ..ExecuteOptions::default()
            },
        )
        .await
        .expect_err("an unknown filter task should fail the call");
    match err {
        EngineError::Dataflow(DataflowError::TaskNotFound(name)) => {
            assert_eq!(name, "nonexistent");
        }
        other => panic!("expected TaskNotFound, got {other:?}"),
    }
}
