//! On-disk layout of the session directory.
//!
//! ```text
//! <root>/repos.json                      repo registry
//! <root>/tokens.json                     token directory
//! <root>/sessions.json                   session index
//! <root>/current.json                    per-chat working tokens
//! <root>/<repoName>/sessions/<id>.json   session records (source of truth)
//! ```

use std::path::{Path, PathBuf};

use cr_domain::error::{Error, Result};

pub const REPOS_FILE: &str = "repos.json";
pub const TOKENS_FILE: &str = "tokens.json";
pub const SESSIONS_INDEX_FILE: &str = "sessions.json";
pub const CURRENT_FILE: &str = "current.json";
pub const SESSIONS_DIR: &str = "sessions";
pub const RECORD_EXT: &str = "json";

#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn repos_path(&self) -> PathBuf {
        self.root.join(REPOS_FILE)
    }

    pub fn tokens_path(&self) -> PathBuf {
        self.root.join(TOKENS_FILE)
    }

    pub fn sessions_index_path(&self) -> PathBuf {
        self.root.join(SESSIONS_INDEX_FILE)
    }

    pub fn current_path(&self) -> PathBuf {
        self.root.join(CURRENT_FILE)
    }

    pub fn repo_sessions_dir(&self, repo_name: &str) -> Result<PathBuf> {
        validate_repo_name(repo_name)?;
        Ok(self.root.join(repo_name).join(SESSIONS_DIR))
    }

    pub fn session_path(&self, repo_name: &str, session_id: &str) -> Result<PathBuf> {
        validate_segment("session id", session_id)?;
        Ok(self
            .repo_sessions_dir(repo_name)?
            .join(format!("{session_id}.{RECORD_EXT}")))
    }
}

/// Reject values that cannot safely be used as a single path component.
pub fn validate_segment(kind: &str, value: &str) -> Result<()> {
    let bad = value.trim().is_empty()
        || value.starts_with('.')
        || value.contains('/')
        || value.contains('\\')
        || value.contains('\0');
    if bad {
        return Err(Error::InvalidInput(format!("{kind} {value:?} is not a valid path segment")));
    }
    Ok(())
}

/// A repo name becomes a directory next to the root index files, so it
/// must also avoid their names.  Every root-level file ends in `.json`,
/// including the runner's continuation map.
pub fn validate_repo_name(name: &str) -> Result<()> {
    validate_segment("repo name", name)?;
    if name.to_ascii_lowercase().ends_with(".json") {
        return Err(Error::InvalidInput(format!(
            "repo name {name:?} clashes with a storage file name"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_path_is_grouped_by_repo() {
        let layout = StoreLayout::new("/data");
        let path = layout.session_path("demo", "abc-123").unwrap();
        assert_eq!(path, PathBuf::from("/data/demo/sessions/abc-123.json"));
    }

    #[test]
    fn traversal_segments_are_rejected() {
        let layout = StoreLayout::new("/data");
        assert!(layout.repo_sessions_dir("../etc").is_err());
        assert!(layout.repo_sessions_dir("a/b").is_err());
        assert!(layout.repo_sessions_dir("").is_err());
        assert!(layout.session_path("demo", "..").is_err());
        assert!(layout.session_path("demo", ".hidden").is_err());
    }

    #[test]
    fn repo_names_cannot_shadow_root_files() {
        let layout = StoreLayout::new("/data");
        for name in [REPOS_FILE, TOKENS_FILE, SESSIONS_INDEX_FILE, CURRENT_FILE, "Tokens.JSON"] {
            let err = layout.repo_sessions_dir(name).unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "{name}");
        }
        assert!(validate_repo_name("codex-session-map.json").is_err());
        assert!(validate_repo_name("json-tools").is_ok());
    }
}
