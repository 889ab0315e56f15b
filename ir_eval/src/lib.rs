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

//! The IR Evaluator external contract (§6): turns a task's opaque
//! `commandIr` hash into an argv, given the scratch paths the Task Runner
//! materialised inputs and wants output written to.
//!
//! `TemplateIrEvaluator` is the one concrete, dependency-free
//! implementation this workspace ships: a `commandIr` blob is a JSON
//! `CommandTemplate` whose argv entries may contain the placeholders
//! `{input:N}` and `{output}`, substituted with the corresponding scratch
//! path at evaluation time.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use model::Hash;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub struct EvalError(pub String);

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IR evaluation failed: {}", self.0)
    }
}

impl std::error::Error for EvalError {}

/// Pure given its inputs: the same `(commandIrHash, inputPaths, outputPath)`
/// always evaluates to the same argv.
#[async_trait]
pub trait IrEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        command_ir: &Hash,
        input_paths: &[PathBuf],
        output_path: &Path,
    ) -> Result<Vec<String>, EvalError>;
}

/// The on-disk shape of a `commandIr` blob for `TemplateIrEvaluator`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub argv: Vec<String>,
}

impl CommandTemplate {
    pub fn new(argv: impl IntoIterator<Item = impl Into<String>>) -> CommandTemplate {
        CommandTemplate {
            argv: argv.into_iter().map(Into::into).collect(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("CommandTemplate always serialises")
    }
}

const OUTPUT_PLACEHOLDER: &str = "{output}";
const INPUT_PLACEHOLDER_PREFIX: &str = "{input:";
const INPUT_PLACEHOLDER_SUFFIX: &str = "}";

fn substitute(
    token: &str,
    input_paths: &[PathBuf],
    output_path: &Path,
) -> Result<String, EvalError> {
    if token == OUTPUT_PLACEHOLDER {
        return Ok(output_path.display().to_string());
    }
    if let Some(index) = token
        .strip_prefix(INPUT_PLACEHOLDER_PREFIX)
        .and_then(|rest| rest.strip_suffix(INPUT_PLACEHOLDER_SUFFIX))
    {
        let index: usize = index
            .parse()
            .map_err(|_| EvalError(format!("malformed input placeholder: {token}")))?;
        let path = input_paths
            .get(index)
            .ok_or_else(|| EvalError(format!("input placeholder {token} has no such input")))?;
        return Ok(path.display().to_string());
    }
    Ok(token.to_string())
}

/// Reads the `commandIr` blob from an `ObjectStore` and substitutes scratch
/// paths into its templated argv.
pub struct TemplateIrEvaluator {
    object_store: Arc<ObjectStore>,
    repo: String,
}

impl TemplateIrEvaluator {
    pub fn new(object_store: Arc<ObjectStore>, repo: impl Into<String>) -> TemplateIrEvaluator {
        TemplateIrEvaluator {
            object_store,
            repo: repo.into(),
        }
    }
}

#[async_trait]
impl IrEvaluator for TemplateIrEvaluator {
    async fn evaluate(
        &self,
        command_ir: &Hash,
        input_paths: &[PathBuf],
        output_path: &Path,
    ) -> Result<Vec<String>, EvalError> {
        let bytes = self
            .object_store
            .read(&self.repo, command_ir)
            .await
            .map_err(|e| EvalError(format!("failed to read commandIr blob: {e}")))?;
        let template: CommandTemplate = serde_json::from_slice(&bytes)
            .map_err(|e| EvalError(format!("malformed commandIr blob: {e}")))?;
        if template.argv.is_empty() {
            return Err(EvalError("commandIr template has an empty argv".to_string()));
        }
        template
            .argv
            .iter()
            .map(|token| substitute(token, input_paths, output_path))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_template(store: &ObjectStore, repo: &str, template: &CommandTemplate) -> Hash {
        store.write(repo, &template.encode()).await.unwrap()
    }

    #[tokio::test]
    async fn substitutes_input_and_output_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ObjectStore::new(dir.path().to_path_buf()));
        let template = CommandTemplate::new(["cp", "{input:0}", "{output}"]);
        let hash = store_template(&store, "repo", &template).await;

        let evaluator = TemplateIrEvaluator::new(store, "repo");
        let argv = evaluator
            .evaluate(
                &hash,
                &[PathBuf::from("/scratch/input-0")],
                Path::new("/scratch/output"),
            )
            .await
            .unwrap();
        assert_eq!(
            argv,
            vec![
                "cp".to_string(),
                "/scratch/input-0".to_string(),
                "/scratch/output".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn rejects_empty_argv_template() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ObjectStore::new(dir.path().to_path_buf()));
        let hash = store_template(&store, "repo", &CommandTemplate::new(Vec::<String>::new())).await;

        let evaluator = TemplateIrEvaluator::new(store, "repo");
        let result = evaluator.evaluate(&hash, &[], Path::new("/scratch/output")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn out_of_range_input_placeholder_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ObjectStore::new(dir.path().to_path_buf()));
        let template = CommandTemplate::new(["{input:3}"]);
        let hash = store_template(&store, "repo", &template).await;

        let evaluator = TemplateIrEvaluator::new(store, "repo");
        let result = evaluator
            .evaluate(&hash, &[PathBuf::from("/only-one")], Path::new("/scratch/output"))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unknown_command_ir_hash_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ObjectStore::new(dir.path().to_path_buf()));
        let evaluator = TemplateIrEvaluator::new(store, "repo");
        let missing = Hash::of_bytes(b"never written");
        let result = evaluator.evaluate(&missing, &[], Path::new("/scratch/output")).await;
        assert!(result.is_err());
    }
}
