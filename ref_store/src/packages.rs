use std::path::PathBuf;

use model::Hash;

use crate::atomic::{list_dir_names, read_optional, remove_if_present, write_atomically};

/// Packages are keyed by `(name, version)`; the ref value is the Hash of the
/// package's `PackageObject`.
#[derive(Clone, Debug)]
pub struct PackageRefs {
    base_dir: PathBuf,
}

impl PackageRefs {
    pub fn new(base_dir: PathBuf) -> PackageRefs {
        PackageRefs { base_dir }
    }

    fn dir(&self, repo: &str, name: &str) -> PathBuf {
        self.base_dir.join(repo).join("packages").join(name)
    }

    fn path(&self, repo: &str, name: &str, version: &str) -> PathBuf {
        self.dir(repo, name).join(version)
    }

    pub async fn resolve(
        &self,
        repo: &str,
        name: &str,
        version: &str,
    ) -> Result<Option<Hash>, String> {
        let Some(bytes) = read_optional(&self.path(repo, name, version)).await? else {
            return Ok(None);
        };
        let hex = String::from_utf8(bytes).map_err(|e| format!("malformed package ref: {e}"))?;
        Hash::from_hex(hex.trim()).map(Some)
    }

    pub async fn write(
        &self,
        repo: &str,
        name: &str,
        version: &str,
        hash: Hash,
    ) -> Result<(), String> {
        write_atomically(&self.path(repo, name, version), hash.to_hex().as_bytes()).await
    }

    pub async fn remove(&self, repo: &str, name: &str, version: &str) -> Result<(), String> {
        remove_if_present(&self.path(repo, name, version)).await
    }

    /// Lists every `(name, version)` pair written for `repo`.
    pub async fn list(&self, repo: &str) -> Result<Vec<(String, String)>, String> {
        let packages_dir = self.base_dir.join(repo).join("packages");
        let names = list_dir_names(&packages_dir).await?;
        let mut pairs = Vec::new();
        for name in names {
            for version in list_dir_names(&self.dir(repo, &name)).await? {
                pairs.push((name.clone(), version));
            }
        }
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs() -> (PackageRefs, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (PackageRefs::new(dir.path().to_path_buf()), dir)
    }

    #[tokio::test]
    async fn write_then_resolve_round_trips() {
        let (refs, _dir) = refs();
        let hash = Hash::of_bytes(b"package bytes");
        refs.write("repo", "demo", "1.0.0", hash).await.unwrap();
        assert_eq!(
            refs.resolve("repo", "demo", "1.0.0").await.unwrap(),
            Some(hash)
        );
    }

    #[tokio::test]
    async fn resolve_of_unknown_package_is_none() {
        let (refs, _dir) = refs();
        assert_eq!(refs.resolve("repo", "demo", "1.0.0").await.unwrap(), None);
    }

    #[tokio::test]
    async fn remove_then_resolve_is_none() {
        let (refs, _dir) = refs();
        let hash = Hash::of_bytes(b"bytes");
        refs.write("repo", "demo", "1.0.0", hash).await.unwrap();
        refs.remove("repo", "demo", "1.0.0").await.unwrap();
        assert_eq!(refs.resolve("repo", "demo", "1.0.0").await.unwrap(), None);
        // Idempotent.
        refs.remove("repo", "demo", "1.0.0").await.unwrap();
    }

    #[tokio::test]
    async fn list_enumerates_every_version() {
        let (refs, _dir) = refs();
        refs.write("repo", "demo", "1.0.0", Hash::of_bytes(b"v1"))
            .await
            .unwrap();
        refs.write("repo", "demo", "2.0.0", Hash::of_bytes(b"v2"))
            .await
            .unwrap();
        refs.write("repo", "other", "1.0.0", Hash::of_bytes(b"o1"))
            .await
            .unwrap();
        let mut listed = refs.list("repo").await.unwrap();
        listed.sort();
        assert_eq!(
            listed,
            vec![
                ("demo".to_string(), "1.0.0".to_string()),
                ("demo".to_string(), "2.0.0".to_string()),
                ("other".to_string(), "1.0.0".to_string()),
            ]
        );
    }
}
