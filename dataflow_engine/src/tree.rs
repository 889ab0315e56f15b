//! Structural resolution and copy-path-to-root mutation of a workspace's
//! data tree (§4.6.2, §4.6.3).
//!
//! A data tree is a chain of `model::Tree` blobs in the Object Store,
//! addressed from a `WorkspaceState::root_hash`. Interior nodes are
//! `DataRef::Tree(hash)`; a leaf is `Unassigned`, `Null`, or `Value(hash)`.
//! Writing a new leaf never mutates an existing blob -- it re-encodes every
//! node on the path from the leaf to the root and returns the new root hash,
//! leaving every prior root (and every node an older root still points at)
//! untouched.

use futures::future::{BoxFuture, FutureExt};
use model::{DataRef, Hash, Tree, TreePath};
use object_store::ObjectStore;

/// The classification of a resolved leaf, before the caller decides what to
/// do about it (§4.6.3: value/null/unassigned/structural violation).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResolveOutcome {
    Value(Hash),
    /// A statically-assigned null leaf; the caller still needs to write
    /// `value_codec::null_blob()` to the Object Store to get its hash.
    Null,
    Unassigned,
    /// The path named an interior `Tree` node instead of a leaf, or stopped
    /// at a non-`Tree` node before reaching the end of the path.
    StructuralViolation,
}

async fn load_tree(object_store: &ObjectStore, repo: &str, hash: Hash) -> Result<Tree, String> {
    let bytes = object_store
        .read(repo, &hash)
        .await
        .map_err(|e| e.to_string())?;
    Tree::decode(&bytes)
}

/// Resolves `path` against the tree rooted at `root_hash`, returning the
/// classified leaf. `path` must not be the root path.
pub async fn resolve_path(
    object_store: &ObjectStore,
    repo: &str,
    root_hash: Hash,
    path: &TreePath,
) -> Result<ResolveOutcome, String> {
    let mut node_hash = root_hash;
    let mut remaining = path.clone();
    loop {
        let Some((head, rest)) = remaining.split_first() else {
            return Err("cannot resolve the root path as a leaf".to_string());
        };
        let tree = load_tree(object_store, repo, node_hash).await?;
        let data_ref = tree.get(head).cloned().unwrap_or(DataRef::Unassigned);

        if rest.is_root() {
            return Ok(match data_ref {
                DataRef::Value(hash) => ResolveOutcome::Value(hash),
                DataRef::Null => ResolveOutcome::Null,
                DataRef::Unassigned => ResolveOutcome::Unassigned,
                DataRef::Tree(_) => ResolveOutcome::StructuralViolation,
            });
        }
        match data_ref {
            DataRef::Tree(next_hash) => {
                node_hash = next_hash;
                remaining = rest;
            }
            _ => return Ok(ResolveOutcome::StructuralViolation),
        }
    }
}

/// Writes `value` at `path` under the tree rooted at `root_hash`, returning
/// the new root hash. Every interior node from the leaf's parent up to the
/// root is re-encoded and written as a new blob; the existing tree rooted at
/// `root_hash` is left untouched (§4.6.2's copy-path-to-root).
pub async fn write_path(
    object_store: &ObjectStore,
    repo: &str,
    root_hash: Hash,
    path: &TreePath,
    value: DataRef,
) -> Result<Hash, String> {
    if path.is_root() {
        return Err("cannot write to the root path".to_string());
    }
    write_path_inner(object_store, repo, root_hash, path.clone(), value).await
}

fn write_path_inner(
    object_store: &ObjectStore,
    repo: &str,
    node_hash: Hash,
    path: TreePath,
    value: DataRef,
) -> BoxFuture<'_, Result<Hash, String>> {
    async move {
        let tree = load_tree(object_store, repo, node_hash).await?;
        let (head, rest) = path.split_first().expect("path is non-root");

        let new_ref = if rest.is_root() {
            value
        } else {
            let child_hash = match tree.get(head) {
                Some(DataRef::Tree(hash)) => *hash,
                _ => {
                    object_store
                        .write(repo, &Tree::empty().encode())
                        .await
                        .map_err(|e| e.to_string())?
                }
            };
            let new_child_hash =
                write_path_inner(object_store, repo, child_hash, rest, value).await?;
            DataRef::Tree(new_child_hash)
        };

        let new_tree = tree.with_field(head, new_ref);
        object_store
            .write(repo, &new_tree.encode())
            .await
            .map_err(|e| e.to_string())
    }
    .boxed()
}
