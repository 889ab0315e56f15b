use std::path::PathBuf;

use model::{ExecutionId, ExecutionStatus, Hash};

use crate::atomic::{list_dir_names, read_optional, write_atomically};

/// Executions are keyed by `(taskHash, inputsHash, executionId)`; latest id
/// wins for caching purposes (§3, §4.2).
#[derive(Clone, Debug)]
pub struct ExecutionRefs {
    base_dir: PathBuf,
}

impl ExecutionRefs {
    pub fn new(base_dir: PathBuf) -> ExecutionRefs {
        ExecutionRefs { base_dir }
    }

    fn task_dir(&self, repo: &str, task_hash: &Hash) -> PathBuf {
        self.base_dir
            .join(repo)
            .join("executions")
            .join(task_hash.to_hex())
    }

    fn inputs_dir(&self, repo: &str, task_hash: &Hash, inputs_hash: &Hash) -> PathBuf {
        self.task_dir(repo, task_hash).join(inputs_hash.to_hex())
    }

    fn path(
        &self,
        repo: &str,
        task_hash: &Hash,
        inputs_hash: &Hash,
        execution_id: ExecutionId,
    ) -> PathBuf {
        self.inputs_dir(repo, task_hash, inputs_hash)
            .join(execution_id.to_string())
    }

    pub async fn get(
        &self,
        repo: &str,
        task_hash: &Hash,
        inputs_hash: &Hash,
        execution_id: ExecutionId,
    ) -> Result<Option<ExecutionStatus>, String> {
        let path = self.path(repo, task_hash, inputs_hash, execution_id);
        let Some(bytes) = read_optional(&path).await? else {
            return Ok(None);
        };
        ExecutionStatus::decode(&bytes).map(Some)
    }

    pub async fn write(
        &self,
        repo: &str,
        task_hash: &Hash,
        inputs_hash: &Hash,
        status: &ExecutionStatus,
    ) -> Result<(), String> {
        let path = self.path(repo, task_hash, inputs_hash, status.execution_id());
        write_atomically(&path, &status.encode()).await
    }

    /// Lists every execution id recorded for `(taskHash, inputsHash)`, in
    /// lexicographically (and hence chronologically, for UUIDv7) ascending
    /// order.
    pub async fn list_ids(
        &self,
        repo: &str,
        task_hash: &Hash,
        inputs_hash: &Hash,
    ) -> Result<Vec<ExecutionId>, String> {
        let names = list_dir_names(&self.inputs_dir(repo, task_hash, inputs_hash)).await?;
        let mut ids = names
            .into_iter()
            .filter_map(|name| name.parse::<ExecutionId>().ok())
            .collect::<Vec<_>>();
        ids.sort();
        Ok(ids)
    }

    /// Lists every `inputsHash` with at least one execution recorded for
    /// `taskHash` (`ListForTask`, §4.2).
    pub async fn list_for_task(&self, repo: &str, task_hash: &Hash) -> Result<Vec<Hash>, String> {
        let names = list_dir_names(&self.task_dir(repo, task_hash)).await?;
        names
            .into_iter()
            .map(|name| Hash::from_hex(&name))
            .collect()
    }

    /// Lists every `(taskHash, inputsHash)` pair with at least one recorded
    /// execution for `repo` (`List`, §4.2).
    pub async fn list(&self, repo: &str) -> Result<Vec<(Hash, Hash)>, String> {
        let executions_dir = self.base_dir.join(repo).join("executions");
        let task_names = list_dir_names(&executions_dir).await?;
        let mut pairs = Vec::new();
        for task_name in task_names {
            let Ok(task_hash) = Hash::from_hex(&task_name) else {
                continue;
            };
            for inputs_hash in self.list_for_task(repo, &task_hash).await? {
                pairs.push((task_hash, inputs_hash));
            }
        }
        Ok(pairs)
    }

    /// The status of the most recently minted execution for
    /// `(taskHash, inputsHash)`, or `None` if there is none.
    pub async fn get_latest(
        &self,
        repo: &str,
        task_hash: &Hash,
        inputs_hash: &Hash,
    ) -> Result<Option<ExecutionStatus>, String> {
        let mut ids = self.list_ids(repo, task_hash, inputs_hash).await?;
        let Some(latest) = ids.pop() else {
            return Ok(None);
        };
        self.get(repo, task_hash, inputs_hash, latest).await
    }

    /// Scans from the lexicographically greatest execution id downward,
    /// returning the first recorded `success.outputHash` -- i.e. the cache
    /// hit a Task Runner probe is looking for (§4.5 step 2).
    pub async fn get_latest_output(
        &self,
        repo: &str,
        task_hash: &Hash,
        inputs_hash: &Hash,
    ) -> Result<Option<Hash>, String> {
        let mut ids = self.list_ids(repo, task_hash, inputs_hash).await?;
        ids.reverse();
        for id in ids {
            if let Some(status) = self.get(repo, task_hash, inputs_hash, id).await? {
                if let Some(output_hash) = status.output_hash() {
                    return Ok(Some(output_hash));
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;

    fn refs() -> (ExecutionRefs, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (ExecutionRefs::new(dir.path().to_path_buf()), dir)
    }

    fn success(output_hash: Hash) -> ExecutionStatus {
        let now = SystemTime::now();
        ExecutionStatus::Success {
            execution_id: ExecutionId::new(),
            input_hashes: vec![Hash::of_bytes(b"in")],
            output_hash,
            started_at: now,
            completed_at: now,
        }
    }

    #[tokio::test]
    async fn write_then_get_round_trips() {
        let (refs, _dir) = refs();
        let task_hash = Hash::of_bytes(b"task");
        let inputs_hash = Hash::of_bytes(b"inputs");
        let status = success(Hash::of_bytes(b"out"));
        refs.write("repo", &task_hash, &inputs_hash, &status)
            .await
            .unwrap();
        assert_eq!(
            refs.get(
                "repo",
                &task_hash,
                &inputs_hash,
                status.execution_id()
            )
            .await
            .unwrap(),
            Some(status)
        );
    }

    #[tokio::test]
    async fn get_latest_output_prefers_the_newest_success() {
        let (refs, _dir) = refs();
        let task_hash = Hash::of_bytes(b"task");
        let inputs_hash = Hash::of_bytes(b"inputs");

        let first = success(Hash::of_bytes(b"v1"));
        refs.write("repo", &task_hash, &inputs_hash, &first)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = success(Hash::of_bytes(b"v2"));
        refs.write("repo", &task_hash, &inputs_hash, &second)
            .await
            .unwrap();

        assert_eq!(
            refs.get_latest_output("repo", &task_hash, &inputs_hash)
                .await
                .unwrap(),
            Some(Hash::of_bytes(b"v2"))
        );
    }

    #[tokio::test]
    async fn get_latest_output_skips_non_success_attempts() {
        let (refs, _dir) = refs();
        let task_hash = Hash::of_bytes(b"task");
        let inputs_hash = Hash::of_bytes(b"inputs");

        let now = SystemTime::now();
        let failed = ExecutionStatus::Failed {
            execution_id: ExecutionId::new(),
            input_hashes: vec![],
            started_at: now,
            completed_at: now,
            exit_code: 1,
        };
        refs.write("repo", &task_hash, &inputs_hash, &failed)
            .await
            .unwrap();

        assert_eq!(
            refs.get_latest_output("repo", &task_hash, &inputs_hash)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn list_for_task_and_list_enumerate_cache_keys() {
        let (refs, _dir) = refs();
        let task_hash = Hash::of_bytes(b"task");
        let inputs_a = Hash::of_bytes(b"a");
        let inputs_b = Hash::of_bytes(b"b");
        refs.write("repo", &task_hash, &inputs_a, &success(Hash::of_bytes(b"oa")))
            .await
            .unwrap();
        refs.write("repo", &task_hash, &inputs_b, &success(Hash::of_bytes(b"ob")))
            .await
            .unwrap();

        let mut for_task = refs.list_for_task("repo", &task_hash).await.unwrap();
        for_task.sort();
        let mut expected = vec![inputs_a, inputs_b];
        expected.sort();
        assert_eq!(for_task, expected);

        let all = refs.list("repo").await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
