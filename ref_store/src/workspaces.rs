use std::path::PathBuf;

use model::WorkspaceState;

use crate::atomic::{list_dir_names, read_optional, remove_if_present, write_atomically};

/// Workspaces are keyed by `name`; an empty or absent ref means "created but
/// not deployed".
#[derive(Clone, Debug)]
pub struct WorkspaceRefs {
    base_dir: PathBuf,
}

impl WorkspaceRefs {
    pub fn new(base_dir: PathBuf) -> WorkspaceRefs {
        WorkspaceRefs { base_dir }
    }

    fn path(&self, repo: &str, name: &str) -> PathBuf {
        self.base_dir.join(repo).join("workspaces").join(name)
    }

    /// Returns `Ok(None)` for a workspace that has never been created or
    /// written, and `Ok(Some(None))` for one that exists but has not been
    /// deployed (an empty state blob).
    pub async fn read(&self, repo: &str, name: &str) -> Result<Option<WorkspaceState>, String> {
        let Some(bytes) = read_optional(&self.path(repo, name)).await? else {
            return Ok(None);
        };
        if bytes.is_empty() {
            return Ok(None);
        }
        WorkspaceState::decode(&bytes).map(Some)
    }

    /// Returns whether a workspace ref exists at all, deployed or not --
    /// distinguishes "workspace_not_found" from "workspace_not_deployed".
    pub async fn created(&self, repo: &str, name: &str) -> Result<bool, String> {
        Ok(read_optional(&self.path(repo, name)).await?.is_some())
    }

    /// Creates an empty (not-yet-deployed) workspace ref.
    pub async fn create(&self, repo: &str, name: &str) -> Result<(), String> {
        write_atomically(&self.path(repo, name), &[]).await
    }

    pub async fn write(
        &self,
        repo: &str,
        name: &str,
        state: &WorkspaceState,
    ) -> Result<(), String> {
        write_atomically(&self.path(repo, name), &state.encode()).await
    }

    pub async fn remove(&self, repo: &str, name: &str) -> Result<(), String> {
        remove_if_present(&self.path(repo, name)).await
    }

    pub async fn list(&self, repo: &str) -> Result<Vec<String>, String> {
        list_dir_names(&self.base_dir.join(repo).join("workspaces")).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use model::Hash;

    use super::*;

    fn refs() -> (WorkspaceRefs, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (WorkspaceRefs::new(dir.path().to_path_buf()), dir)
    }

    fn state() -> WorkspaceState {
        let now = SystemTime::now();
        WorkspaceState {
            package_name: "demo".to_string(),
            package_version: "1.0.0".to_string(),
            package_hash: Hash::of_bytes(b"pkg"),
            root_hash: Hash::of_bytes(b"root"),
            deployed_at: now,
            root_updated_at: now,
        }
    }

    #[tokio::test]
    async fn unknown_workspace_is_not_found() {
        let (refs, _dir) = refs();
        assert!(!refs.created("repo", "ws").await.unwrap());
        assert_eq!(refs.read("repo", "ws").await.unwrap(), None);
    }

    #[tokio::test]
    async fn created_but_undeployed_workspace_reads_as_none_but_exists() {
        let (refs, _dir) = refs();
        refs.create("repo", "ws").await.unwrap();
        assert!(refs.created("repo", "ws").await.unwrap());
        assert_eq!(refs.read("repo", "ws").await.unwrap(), None);
    }

    #[tokio::test]
    async fn deployed_workspace_round_trips() {
        let (refs, _dir) = refs();
        let s = state();
        refs.write("repo", "ws", &s).await.unwrap();
        assert_eq!(refs.read("repo", "ws").await.unwrap(), Some(s));
    }

    #[tokio::test]
    async fn list_enumerates_workspace_names() {
        let (refs, _dir) = refs();
        refs.create("repo", "a").await.unwrap();
        refs.write("repo", "b", &state()).await.unwrap();
        assert_eq!(refs.list("repo").await.unwrap(), vec!["a", "b"]);
    }
}
