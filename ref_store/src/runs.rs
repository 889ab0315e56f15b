use std::path::PathBuf;

use model::{DataflowRun, RunId};

use crate::atomic::{list_dir_names, read_optional, remove_if_present, write_atomically};

/// Dataflow runs are keyed by `(workspace, runId)`.
#[derive(Clone, Debug)]
pub struct RunRefs {
    base_dir: PathBuf,
}

impl RunRefs {
    pub fn new(base_dir: PathBuf) -> RunRefs {
        RunRefs { base_dir }
    }

    fn dir(&self, repo: &str, workspace: &str) -> PathBuf {
        self.base_dir
            .join(repo)
            .join("dataflow-runs")
            .join(workspace)
    }

    fn path(&self, repo: &str, workspace: &str, run_id: RunId) -> PathBuf {
        self.dir(repo, workspace).join(run_id.to_string())
    }

    pub async fn get(
        &self,
        repo: &str,
        workspace: &str,
        run_id: RunId,
    ) -> Result<Option<DataflowRun>, String> {
        let Some(bytes) = read_optional(&self.path(repo, workspace, run_id)).await? else {
            return Ok(None);
        };
        DataflowRun::decode(&bytes).map(Some)
    }

    pub async fn write(&self, repo: &str, run: &DataflowRun) -> Result<(), String> {
        write_atomically(&self.path(repo, &run.workspace, run.run_id), &run.encode()).await
    }

    pub async fn list(&self, repo: &str, workspace: &str) -> Result<Vec<RunId>, String> {
        let names = list_dir_names(&self.dir(repo, workspace)).await?;
        let mut ids = names
            .into_iter()
            .filter_map(|name| name.parse::<RunId>().ok())
            .collect::<Vec<_>>();
        ids.sort();
        Ok(ids)
    }

    /// The most recently created run for `workspace`, if any (the one
    /// `dataflowExecution`/`dataflowCancel` operate against).
    pub async fn get_latest(
        &self,
        repo: &str,
        workspace: &str,
    ) -> Result<Option<DataflowRun>, String> {
        let mut ids = self.list(repo, workspace).await?;
        let Some(latest) = ids.pop() else {
            return Ok(None);
        };
        self.get(repo, workspace, latest).await
    }

    pub async fn delete(&self, repo: &str, workspace: &str, run_id: RunId) -> Result<(), String> {
        remove_if_present(&self.path(repo, workspace, run_id)).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;

    fn refs() -> (RunRefs, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (RunRefs::new(dir.path().to_path_buf()), dir)
    }

    #[tokio::test]
    async fn write_then_get_round_trips() {
        let (refs, _dir) = refs();
        let run = DataflowRun::new("ws", SystemTime::now());
        refs.write("repo", &run).await.unwrap();
        assert_eq!(
            refs.get("repo", "ws", run.run_id).await.unwrap(),
            Some(run)
        );
    }

    #[tokio::test]
    async fn get_latest_returns_most_recent_run() {
        let (refs, _dir) = refs();
        let first = DataflowRun::new("ws", SystemTime::now());
        refs.write("repo", &first).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = DataflowRun::new("ws", SystemTime::now());
        refs.write("repo", &second).await.unwrap();

        assert_eq!(
            refs.get_latest("repo", "ws").await.unwrap().map(|r| r.run_id),
            Some(second.run_id)
        );
    }

    #[tokio::test]
    async fn delete_removes_the_run() {
        let (refs, _dir) = refs();
        let run = DataflowRun::new("ws", SystemTime::now());
        refs.write("repo", &run).await.unwrap();
        refs.delete("repo", "ws", run.run_id).await.unwrap();
        assert_eq!(refs.get("repo", "ws", run.run_id).await.unwrap(), None);
        refs.delete("repo", "ws", run.run_id).await.unwrap(); // idempotent
    }
}
