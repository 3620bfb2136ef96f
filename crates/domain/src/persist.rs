//! JSON file helpers shared by every persisted index.
//!
//! Reads are self-healing: a missing, unreadable, or malformed file yields
//! the type's default.  Writes go to a uniquely named sibling temp file which
//! is synced and then renamed over the target, so a crash never leaves a
//! half-written file behind.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::Result;

/// Read a JSON document, falling back to `T::default()` when the file is
/// absent or cannot be parsed.
pub async fn read_json_or_default<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    read_json(path).await.unwrap_or_default()
}

/// Read a JSON document.  `None` when the file is absent or corrupt; corrupt
/// files are logged.
pub async fn read_json<T>(path: &Path) -> Option<T>
where
    T: DeserializeOwned,
{
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read JSON file");
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring malformed JSON file");
            None
        }
    }
}

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
pub async fn write_json_atomic<T>(path: &Path, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    let mut body = serde_json::to_vec_pretty(value)?;
    body.push(b'\n');

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let tmp_path = temp_sibling(path);
    if let Err(e) = write_and_sync(&tmp_path, &body).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(e.into());
    }

    if let Err(e) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(e.into());
    }

    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let tmp_name = format!(
        ".{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        uuid::Uuid::new_v4().as_simple()
    );
    path.with_file_name(tmp_name)
}

async fn write_and_sync(path: &Path, body: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(body).await?;
    file.flush().await?;
    file.sync_data().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn missing_file_reads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let value: BTreeMap<String, u32> = read_json_or_default(&dir.path().join("nope.json")).await;
        assert!(value.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_reads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let value: BTreeMap<String, u32> = read_json_or_default(&path).await;
        assert!(value.is_empty());
    }

    #[tokio::test]
    async fn atomic_write_creates_parents_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("index.json");
        let mut value = BTreeMap::new();
        value.insert("a".to_string(), 1u32);

        write_json_atomic(&path, &value).await.unwrap();

        let back: BTreeMap<String, u32> = read_json_or_default(&path).await;
        assert_eq!(back.get("a"), Some(&1));
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
