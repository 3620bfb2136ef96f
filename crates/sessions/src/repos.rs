//! Registry of named workspace directories (`repos.json`).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cr_domain::error::{Error, Result};
use cr_domain::persist::{read_json_or_default, write_json_atomic};

use crate::layout::validate_repo_name;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repo {
    pub name: String,
    pub path: PathBuf,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoFile {
    #[serde(default)]
    pub repos: Vec<Repo>,
}

/// Reads and writes the repo registry file.  Mutations are expected to be
/// serialised by the owning [`SessionStore`](crate::SessionStore).
#[derive(Debug, Clone)]
pub struct RepoRegistry {
    path: PathBuf,
}

impl RepoRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn list(&self) -> Vec<Repo> {
        read_json_or_default::<RepoFile>(&self.path).await.repos
    }

    pub async fn get(&self, name: &str) -> Option<Repo> {
        self.list().await.into_iter().find(|r| r.name == name)
    }

    /// Find the repo whose registered path equals `workdir`.
    pub async fn find_by_workdir(&self, workdir: &Path) -> Option<Repo> {
        let wanted = normalize(workdir).await;
        for repo in self.list().await {
            if normalize(&repo.path).await == wanted {
                return Some(repo);
            }
        }
        None
    }

    pub async fn add(&self, name: &str, path: &Path) -> Result<Repo> {
        validate_repo_name(name)?;
        let canonical = tokio::fs::canonicalize(path).await.map_err(|e| {
            Error::InvalidInput(format!("path does not exist: {} ({e})", path.display()))
        })?;
        if !tokio::fs::metadata(&canonical).await?.is_dir() {
            return Err(Error::InvalidInput(format!(
                "path is not a directory: {}",
                canonical.display()
            )));
        }

        let mut file: RepoFile = read_json_or_default(&self.path).await;
        if file.repos.iter().any(|r| r.name == name) {
            return Err(Error::Conflict(format!("repo name already exists: {name}")));
        }

        let repo = Repo {
            name: name.to_owned(),
            path: canonical,
            added_at: Utc::now(),
        };
        file.repos.push(repo.clone());
        write_json_atomic(&self.path, &file).await?;

        tracing::info!(repo = %repo.name, path = %repo.path.display(), "repo registered");
        Ok(repo)
    }

    pub async fn remove(&self, name: &str) -> Result<Repo> {
        let mut file: RepoFile = read_json_or_default(&self.path).await;
        let pos = file
            .repos
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| Error::NotFound(format!("repo {name}")))?;
        let removed = file.repos.remove(pos);
        write_json_atomic(&self.path, &file).await?;

        tracing::info!(repo = %removed.name, "repo deregistered");
        Ok(removed)
    }
}

async fn normalize(path: &Path) -> PathBuf {
    tokio::fs::canonicalize(path)
        .await
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_list_remove_roundtrip() {
        let root = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let registry = RepoRegistry::new(root.path().join("repos.json"));

        let repo = registry.add("demo", work.path()).await.unwrap();
        assert_eq!(repo.path, std::fs::canonicalize(work.path()).unwrap());
        assert_eq!(registry.list().await.len(), 1);
        assert!(registry.find_by_workdir(work.path()).await.is_some());

        let err = registry.add("demo", work.path()).await.unwrap_err();
        assert!(err.is_conflict());

        registry.remove("demo").await.unwrap();
        assert!(registry.get("demo").await.is_none());
        assert!(registry.remove("demo").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn add_rejects_missing_path() {
        let root = tempfile::tempdir().unwrap();
        let registry = RepoRegistry::new(root.path().join("repos.json"));
        let err = registry
            .add("ghost", &root.path().join("does-not-exist"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn add_rejects_storage_file_names() {
        let root = tempfile::tempdir().unwrap();
        let registry = RepoRegistry::new(root.path().join("repos.json"));
        let err = registry.add("tokens.json", root.path()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(registry.list().await.is_empty());
    }
}
