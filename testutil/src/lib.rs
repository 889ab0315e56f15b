// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Shared test fixtures for the dataflow execution engine, mirroring the
//! teacher's own `testutil` crate: a temp-repo builder that wires up real
//! Object/Ref/Lock/Log stores plus a `TaskRunner` over a `tempfile::TempDir`,
//! a deterministic `FakeProcessIdentity`, and small helpers for building
//! packages out of `bash -c` tasks so engine-level tests never need to hand
//! write JSON blobs.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use ir_eval::{CommandTemplate, TemplateIrEvaluator};
use lock_service::{LockService, StandardLivenessProbe};
use log_store::LogStore;
use model::{Hash, PackageObject, Structure, TaskObject, Tree, TreePath, WorkspaceState};
use object_store::ObjectStore;
use process_identity::FakeProcessIdentity;
use ref_store::RefStore;
use task_runner::{ProcessTaskRunner, TaskRunner};

/// The fixed repo name every `TestRepo` operates under; tests never need
/// more than one repo namespace at a time.
pub const REPO: &str = "repo";

pub fn owned_string_vec(args: &[&str]) -> Vec<String> {
    args.iter().map(<&str>::to_string).collect()
}

/// A temp-directory-backed repo wiring up every storage component plus a
/// real `ProcessTaskRunner`, so a test can drive `dataflow_engine` end to end
/// against actual `bash -c` subprocesses without touching the real
/// filesystem layout a production deployment would use.
pub struct TestRepo {
    _dir: tempfile::TempDir,
    pub object_store: Arc<ObjectStore>,
    pub ref_store: Arc<RefStore>,
    pub lock_service: Arc<LockService>,
    pub log_store: Arc<LogStore>,
    pub process_identity: Arc<FakeProcessIdentity>,
}

impl TestRepo {
    /// Builds a fresh repo with a `FakeProcessIdentity` that reports its own
    /// current pid alive, so lock acquisition and `ProcessTaskRunner`'s
    /// `running` status both see a live holder by default.
    pub fn new() -> TestRepo {
        let dir = tempfile::tempdir().expect("failed to create temp dir for TestRepo");
        let identity = Arc::new(FakeProcessIdentity::new(std::process::id(), "test-boot"));
        identity.mark_alive(identity.pid, 1);

        let object_store = Arc::new(ObjectStore::new(dir.path().join("objects")));
        let ref_store = Arc::new(RefStore::new(dir.path().join("refs")));
        let probe = Arc::new(StandardLivenessProbe::new(identity.clone()));
        let lock_service = Arc::new(LockService::new(dir.path().join("locks"), probe));
        let log_store = Arc::new(LogStore::new(dir.path().join("logs")));

        TestRepo {
            _dir: dir,
            object_store,
            ref_store,
            lock_service,
            log_store,
            process_identity: identity,
        }
    }

    /// A `TaskRunner` backed by this repo's stores and a `TemplateIrEvaluator`,
    /// wired the way a production binary would assemble `ProcessTaskRunner`.
    pub fn task_runner(&self) -> Arc<dyn TaskRunner> {
        let evaluator = Arc::new(TemplateIrEvaluator::new(self.object_store.clone(), REPO));
        Arc::new(ProcessTaskRunner::new(
            self.object_store.clone(),
            self.ref_store.clone(),
            self.log_store.clone(),
            evaluator,
            self.process_identity.clone(),
            self._dir.path().join("scratch"),
        ))
    }

    /// Writes one `TaskObject` (with a `bash -c`-flavoured argv template) to
    /// the object store and returns its hash plus name, ready to be folded
    /// into a `PackageObject`'s task map by `deploy_package`.
    pub async fn write_task(
        &self,
        name: &str,
        argv: &[&str],
        inputs: &[TreePath],
        output: &TreePath,
    ) -> (String, Hash) {
        let template = CommandTemplate::new(argv.iter().copied());
        let command_ir = self
            .object_store
            .write(REPO, &template.encode())
            .await
            .expect("failed to write commandIr blob");
        let task = TaskObject {
            command_ir,
            inputs: inputs.to_vec(),
            output: output.clone(),
        };
        let task_hash = self
            .object_store
            .write(REPO, &task.encode())
            .await
            .expect("failed to write TaskObject");
        (name.to_string(), task_hash)
    }

    /// Assembles a `PackageObject` out of already-written tasks, deploys it
    /// to a fresh workspace rooted at an empty tree, and returns the
    /// resulting `WorkspaceState`. The package's `Structure` is a flat
    /// `struct` of one `value` field per distinct top-level output/input
    /// path segment, enough to describe the tree shapes these fixtures
    /// exercise without modelling nested structs.
    pub async fn deploy_package(
        &self,
        workspace: &str,
        package_name: &str,
        package_version: &str,
        tasks: Vec<(String, Hash, Vec<TreePath>, TreePath)>,
    ) -> WorkspaceState {
        let mut field_names: Vec<String> = Vec::new();
        for (_, _, inputs, output) in &tasks {
            for path in inputs.iter().chain(std::iter::once(output)) {
                if let Some((head, _)) = path.split_first() {
                    if !field_names.iter().any(|f| f == head) {
                        field_names.push(head.to_string());
                    }
                }
            }
        }
        let structure = Structure::Struct(
            field_names
                .into_iter()
                .map(|name| (name, Structure::Value))
                .collect(),
        );

        let mut task_map = BTreeMap::new();
        for (name, hash, _, _) in &tasks {
            task_map.insert(name.clone(), *hash);
        }
        let data = self
            .object_store
            .write(REPO, &Tree::empty().encode())
            .await
            .expect("failed to write empty data blob");
        let package = PackageObject {
            structure,
            data,
            tasks: task_map,
        };
        let package_hash = self
            .object_store
            .write(REPO, &package.encode())
            .await
            .expect("failed to write PackageObject");
        self.ref_store
            .packages
            .write(REPO, package_name, package_version, package_hash)
            .await
            .expect("failed to write package ref");

        let root_hash = self
            .object_store
            .write(REPO, &Tree::empty().encode())
            .await
            .expect("failed to write empty workspace root");
        let now = SystemTime::now();
        let state = WorkspaceState {
            package_name: package_name.to_string(),
            package_version: package_version.to_string(),
            package_hash,
            root_hash,
            deployed_at: now,
            root_updated_at: now,
        };
        self.ref_store
            .workspaces
            .write(REPO, workspace, &state)
            .await
            .expect("failed to write workspace state");
        state
    }
}

impl Default for TestRepo {
    fn default() -> TestRepo {
        TestRepo::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deploy_package_produces_a_deployed_workspace() {
        let repo = TestRepo::new();
        let (name, hash) = repo
            .write_task(
                "compute",
                &["bash", "-c", "echo hi > {output}"],
                &[],
                &TreePath::field("compute_out"),
            )
            .await;
        let state = repo
            .deploy_package(
                "ws",
                "demo",
                "1.0.0",
                vec![(name, hash, vec![], TreePath::field("compute_out"))],
            )
            .await;
        assert_eq!(state.package_name, "demo");
        assert!(repo
            .ref_store
            .workspaces
            .read(REPO, "ws")
            .await
            .unwrap()
            .is_some());
    }
}
