use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn unique_tmp_name() -> String {
    let counter = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!(".tmp-{}-{}-{}", std::process::id(), nanos, counter)
}

/// Atomically writes `bytes` to `dest`: stage into a uniquely-named sibling
/// file, then `rename` into place. A reader of `dest` always sees either the
/// entire prior value or the entire new one, never a torn mix (Invariant 5).
pub async fn write_atomically(dest: &Path, bytes: &[u8]) -> Result<(), String> {
    let parent = dest
        .parent()
        .ok_or_else(|| format!("ref path has no parent: {}", dest.display()))?;
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| format!("failed to create {}: {e}", parent.display()))?;

    let tmp_path = parent.join(unique_tmp_name());
    tokio::fs::write(&tmp_path, bytes)
        .await
        .map_err(|e| format!("failed to stage write to {}: {e}", tmp_path.display()))?;
    if let Err(e) = tokio::fs::rename(&tmp_path, dest).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(format!("failed to commit write to {}: {e}", dest.display()));
    }
    Ok(())
}

/// Reads the bytes at `path`, or `None` if no ref has been written there yet.
pub async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, String> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(format!("failed to read {}: {e}", path.display())),
    }
}

/// Removes the ref at `path`, if any. Idempotent.
pub async fn remove_if_present(path: &Path) -> Result<(), String> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(format!("failed to remove {}: {e}", path.display())),
    }
}

/// Lists the file-name entries of a directory, or an empty list if the
/// directory does not exist.
pub async fn list_dir_names(dir: &PathBuf) -> Result<Vec<String>, String> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(format!("failed to list {}: {e}", dir.display())),
    };
    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| format!("failed to list {}: {e}", dir.display()))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with('.') {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}
