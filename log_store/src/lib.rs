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

//! C4: per-execution append-only byte logs for stdout/stderr, with
//! paginated reads.
//!
//! Appends within one `(executionId, stream)` key are serialised through a
//! per-key `tokio::sync::Mutex` so two concurrent writers (the Task Runner's
//! stdout and stderr tees run concurrently, and a caller could in principle
//! retry an append) never interleave partial writes into the same file --
//! the same per-key-serialisation idea the Lock Service applies to whole
//! workspaces, scoped down to a single log stream here.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use model::Hash;
use parking_lot::Mutex as SyncMutex;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;

/// The two byte streams a Task Runner invocation produces.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn file_name(self) -> &'static str {
        match self {
            Stream::Stdout => "stdout.log",
            Stream::Stderr => "stderr.log",
        }
    }
}

impl std::fmt::Display for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stream::Stdout => write!(f, "stdout"),
            Stream::Stderr => write!(f, "stderr"),
        }
    }
}

/// A window into a log, as returned by `read`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogWindow {
    pub data: Vec<u8>,
    pub offset: u64,
    pub size: u64,
    pub total_size: u64,
    /// Whether this window reached the end of the bytes appended so far.
    /// Does not imply the execution itself has finished: a later `append`
    /// can always extend the log again.
    pub complete: bool,
}

#[derive(Clone, Eq, PartialEq, Hash)]
struct LogKey {
    repo: String,
    task_hash: Hash,
    inputs_hash: Hash,
    execution_id: String,
    stream: Stream,
}

#[derive(Clone)]
pub struct LogStore {
    base_dir: PathBuf,
    write_locks: Arc<SyncMutex<HashMap<LogKey, Arc<AsyncMutex<()>>>>>,
}

impl LogStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> LogStore {
        LogStore {
            base_dir: base_dir.into(),
            write_locks: Arc::new(SyncMutex::new(HashMap::new())),
        }
    }

    fn dir(&self, repo: &str, task_hash: &Hash, inputs_hash: &Hash, execution_id: &str) -> PathBuf {
        self.base_dir
            .join(repo)
            .join("logs")
            .join(task_hash.to_hex())
            .join(inputs_hash.to_hex())
            .join(execution_id)
    }

    fn path(
        &self,
        repo: &str,
        task_hash: &Hash,
        inputs_hash: &Hash,
        execution_id: &str,
        stream: Stream,
    ) -> PathBuf {
        self.dir(repo, task_hash, inputs_hash, execution_id)
            .join(stream.file_name())
    }

    fn lock_for(&self, key: LogKey) -> Arc<AsyncMutex<()>> {
        self.write_locks
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Appends `bytes` to the named stream, creating the log (and any
    /// missing parent directories) on first write. Concurrent appends to the
    /// same `(executionId, stream)` are serialised; appends to different
    /// streams, or different executions, proceed independently.
    pub async fn append(
        &self,
        repo: &str,
        task_hash: &Hash,
        inputs_hash: &Hash,
        execution_id: &str,
        stream: Stream,
        bytes: &[u8],
    ) -> Result<(), String> {
        let key = LogKey {
            repo: repo.to_string(),
            task_hash: task_hash.clone(),
            inputs_hash: inputs_hash.clone(),
            execution_id: execution_id.to_string(),
            stream,
        };
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        let path = self.path(repo, task_hash, inputs_hash, execution_id, stream);
        let parent = path
            .parent()
            .ok_or_else(|| format!("log path has no parent: {}", path.display()))?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("failed to create {}: {e}", parent.display()))?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| format!("failed to open log {}: {e}", path.display()))?;
        file.write_all(bytes)
            .await
            .map_err(|e| format!("failed to append to log {}: {e}", path.display()))?;
        Ok(())
    }

    /// Reads a window of the log starting at `offset`, at most `limit`
    /// bytes (the whole remaining tail if `limit` is `None`). Reading a
    /// stream that has never been appended to returns an empty, complete
    /// window rather than an error.
    pub async fn read(
        &self,
        repo: &str,
        task_hash: &Hash,
        inputs_hash: &Hash,
        execution_id: &str,
        stream: Stream,
        offset: u64,
        limit: Option<u64>,
    ) -> Result<LogWindow, String> {
        let path = self.path(repo, task_hash, inputs_hash, execution_id, stream);
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(LogWindow {
                    data: Vec::new(),
                    offset,
                    size: 0,
                    total_size: 0,
                    complete: true,
                });
            }
            Err(e) => return Err(format!("failed to open log {}: {e}", path.display())),
        };

        let total_size = file
            .metadata()
            .await
            .map_err(|e| format!("failed to stat log {}: {e}", path.display()))?
            .len();

        if offset >= total_size {
            return Ok(LogWindow {
                data: Vec::new(),
                offset,
                size: 0,
                total_size,
                complete: true,
            });
        }

        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(|e| format!("failed to seek log {}: {e}", path.display()))?;

        let available = total_size - offset;
        let want = limit.map_or(available, |limit| limit.min(available));
        let mut data = vec![0u8; want as usize];
        file.read_exact(&mut data)
            .await
            .map_err(|e| format!("failed to read log {}: {e}", path.display()))?;

        let size = data.len() as u64;
        Ok(LogWindow {
            complete: offset + size >= total_size,
            data,
            offset,
            size,
            total_size,
        })
    }
}
