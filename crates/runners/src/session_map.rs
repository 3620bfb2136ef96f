//! Persisted `sessionKey → continuation id` map owned by the resumable
//! runner.
//!
//! Lives apart from the session records and can be reset without touching
//! them.  Every mutation is a full read-modify-write with atomic replace,
//! serialised within the process by an async mutex.  There is no reindex
//! for this file: entries lost to a cross-process race are simply gone and
//! the next command starts a fresh conversation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use cr_domain::error::Result;
use cr_domain::persist::{read_json_or_default, write_json_atomic};
use cr_domain::trace::TraceEvent;

pub const SESSION_MAP_FILE: &str = "codex-session-map.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMapFile {
    /// Null values are tolerated on read and treated as absent.
    #[serde(default)]
    pub sessions: BTreeMap<String, Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

pub struct RunnerSessionMap {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl RunnerSessionMap {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get(&self, session_key: &str) -> Option<String> {
        let file: SessionMapFile = read_json_or_default(&self.path).await;
        file.sessions
            .get(session_key)
            .cloned()
            .flatten()
            .filter(|id| !id.is_empty())
    }

    pub async fn has(&self, session_key: &str) -> bool {
        self.get(session_key).await.is_some()
    }

    pub async fn set(&self, session_key: &str, continuation_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut file: SessionMapFile = read_json_or_default(&self.path).await;
        file.sessions
            .insert(session_key.to_owned(), Some(continuation_id.to_owned()));
        file.last_updated = Some(Utc::now());
        write_json_atomic(&self.path, &file).await
    }

    /// Every non-empty `(key, continuation id)` pair.
    pub async fn entries(&self) -> Vec<(String, String)> {
        let file: SessionMapFile = read_json_or_default(&self.path).await;
        file.sessions
            .into_iter()
            .filter_map(|(k, v)| v.filter(|id| !id.is_empty()).map(|id| (k, id)))
            .collect()
    }

    /// Move the continuation stored under `from` to `to`, replacing any
    /// value `to` held.  Returns whether `from` existed.
    pub async fn rekey(&self, from: &str, to: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut file: SessionMapFile = read_json_or_default(&self.path).await;
        let Some(value) = file.sessions.remove(from) else {
            return Ok(false);
        };
        file.sessions.insert(to.to_owned(), value);
        file.last_updated = Some(Utc::now());
        write_json_atomic(&self.path, &file).await?;
        Ok(true)
    }

    /// Drop the continuation for one key.  Returns whether it existed.
    pub async fn clear(&self, session_key: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut file: SessionMapFile = read_json_or_default(&self.path).await;
        let removed = file.sessions.remove(session_key).is_some();
        if removed {
            file.last_updated = Some(Utc::now());
            write_json_atomic(&self.path, &file).await?;
        }
        TraceEvent::RunnerSessionsCleared {
            key: Some(session_key.to_owned()),
        }
        .emit();
        Ok(removed)
    }

    /// Reset the whole map.  Returns whether it held anything.
    pub async fn clear_all(&self) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let previous: SessionMapFile = read_json_or_default(&self.path).await;
        let file = SessionMapFile {
            sessions: BTreeMap::new(),
            last_updated: Some(Utc::now()),
        };
        write_json_atomic(&self.path, &file).await?;
        TraceEvent::RunnerSessionsCleared { key: None }.emit();
        Ok(!previous.sessions.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_and_clear_single_key() {
        let dir = tempfile::tempdir().unwrap();
        let map = RunnerSessionMap::new(dir.path().join(SESSION_MAP_FILE));

        assert!(!map.has("chat-1").await);
        map.set("chat-1", "thread-a").await.unwrap();
        map.set("chat-2", "thread-b").await.unwrap();
        map.set("chat-1", "thread-c").await.unwrap();
        assert_eq!(map.get("chat-1").await.as_deref(), Some("thread-c"));

        assert!(map.clear("chat-1").await.unwrap());
        assert!(!map.clear("chat-1").await.unwrap());
        assert!(!map.has("chat-1").await);
        assert!(map.has("chat-2").await);
    }

    #[tokio::test]
    async fn clear_all_resets_everything() {
        let dir = tempfile::tempdir().unwrap();
        let map = RunnerSessionMap::new(dir.path().join(SESSION_MAP_FILE));
        map.set("a", "1").await.unwrap();
        map.set("b", "2").await.unwrap();

        assert!(map.clear_all().await.unwrap());
        assert!(!map.has("a").await);
        assert!(!map.has("b").await);

        let raw = tokio::fs::read_to_string(map.path()).await.unwrap();
        let file: SessionMapFile = serde_json::from_str(&raw).unwrap();
        assert!(file.sessions.is_empty());
        assert!(file.last_updated.is_some());
    }

    #[tokio::test]
    async fn null_and_corrupt_entries_read_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SESSION_MAP_FILE);
        tokio::fs::write(&path, r#"{"sessions": {"a": null, "b": ""}}"#)
            .await
            .unwrap();
        let map = RunnerSessionMap::new(&path);
        assert!(!map.has("a").await);
        assert!(!map.has("b").await);

        tokio::fs::write(&path, "][").await.unwrap();
        assert!(!map.has("a").await);
        map.set("a", "x").await.unwrap();
        assert!(map.has("a").await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sets_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let map = std::sync::Arc::new(RunnerSessionMap::new(dir.path().join(SESSION_MAP_FILE)));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let map = map.clone();
                tokio::spawn(async move { map.set(&format!("key-{i}"), &format!("thread-{i}")).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for i in 0..16 {
            assert_eq!(
                map.get(&format!("key-{i}")).await,
                Some(format!("thread-{i}"))
            );
        }
    }

    #[tokio::test]
    async fn rekey_moves_the_continuation() {
        let dir = tempfile::tempdir().unwrap();
        let map = RunnerSessionMap::new(dir.path().join(SESSION_MAP_FILE));
        map.set("telegram:42", "thread-a").await.unwrap();

        assert!(map.rekey("telegram:42", "ABCD1234").await.unwrap());
        assert!(!map.rekey("telegram:42", "ABCD1234").await.unwrap());
        assert_eq!(
            map.entries().await,
            vec![("ABCD1234".to_owned(), "thread-a".to_owned())]
        );
    }
}
